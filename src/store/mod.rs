//! Хранилище событий и броней.
//!
//! `Ledger` отдаёт транзакции (`LedgerTx`), внутри которых чтения `lock_*`
//! берут эксклюзивную блокировку строки до конца транзакции. Все изменения
//! счётчика мест и статусов броней идут только через `LedgerTx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Booking, BookingStatus, Event, NewBooking, NewEvent};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Какие события показывать в списке.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Only `actual` events dated after the given moment.
    UpcomingAt(DateTime<Utc>),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn create_event(&self, event: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError>;

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError>;

    async fn list_bookings_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError>;
}

/// Открытая транзакция. Drop без `commit` равносилен откату.
#[async_trait]
pub trait LedgerTx: Send {
    /// SELECT ... FOR UPDATE по событию.
    async fn lock_event(&mut self, event_id: i64) -> Result<Event, StoreError>;

    /// SELECT ... FOR UPDATE по брони.
    async fn lock_booking(&mut self, booking_id: i64) -> Result<Booking, StoreError>;

    /// Блокирует все неподтверждённые брони с истёкшим дедлайном.
    async fn lock_expired_bookings(&mut self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError>;

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> Result<(), StoreError>;

    async fn delete_booking(&mut self, booking_id: i64) -> Result<(), StoreError>;

    /// Сдвигает `available_seats` на `delta`. Выход за `0..=total_seats` это `Integrity`.
    async fn adjust_available_seats(&mut self, event_id: i64, delta: i32) -> Result<(), StoreError>;

    async fn delete_event(&mut self, event_id: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
