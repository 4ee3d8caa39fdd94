pub mod user;
pub mod event;
pub mod booking;

pub use user::Role;
pub use event::{Event, EventStatus, NewEvent};
pub use booking::{Booking, BookingStatus, NewBooking};

/// Строка из БД или заголовка не соответствует ни одному значению перечисления.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}
