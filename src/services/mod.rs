pub mod booking;
pub mod cleanup;
pub mod ledger;

pub use booking::BookingService;
pub use cleanup::{ExpirationSweeper, SweepReport};
pub use ledger::{Applied, LedgerWrite, SeatLedger};
