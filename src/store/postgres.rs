use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{EventFilter, Ledger, LedgerTx};
use crate::error::StoreError;
use crate::models::{Booking, BookingStatus, Event, EventStatus, NewBooking, NewEvent};

const EVENT_COLUMNS: &str = "id, title, description, status, event_date, booking_window, \
                             total_seats, available_seats, created_at";
const BOOKING_COLUMNS: &str = "id, event_id, user_id, status, created_at, confirm_deadline";

/// Хранилище поверх Postgres. Блокировки строк это обычный `FOR UPDATE`.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn create_event(&self, event: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError> {
        let query = format!(
            "INSERT INTO events (title, description, status, event_date, booking_window, \
                                 total_seats, available_seats, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
             RETURNING {EVENT_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Event>(&query)
            .bind(&event.title)
            .bind(&event.description)
            .bind(EventStatus::Actual.as_str())
            .bind(event.event_date)
            .bind(event.booking_window)
            .bind(event.total_seats)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let events = match filter {
            EventFilter::All => {
                let query = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY event_date, id");
                sqlx::query_as::<_, Event>(&query).fetch_all(&self.pool).await?
            }
            EventFilter::UpcomingAt(now) => {
                let query = format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE event_date > $1 AND status = $2
                     ORDER BY event_date, id"
                );
                sqlx::query_as::<_, Event>(&query)
                    .bind(now)
                    .bind(EventStatus::Actual.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(events)
    }

    async fn list_bookings_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let bookings = sqlx::query_as::<_, Booking>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(bookings)
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl PgLedgerTx {
    async fn event_exists(&mut self, event_id: i64) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
            .bind(event_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_event(&mut self, event_id: i64) -> Result<Event, StoreError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Event>(&query)
            .bind(event_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn lock_booking(&mut self, booking_id: i64) -> Result<Booking, StoreError> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Booking>(&query)
            .bind(booking_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn lock_expired_bookings(&mut self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE confirm_deadline < $1 AND status <> $2
             ORDER BY id
             FOR UPDATE"
        );
        let bookings = sqlx::query_as::<_, Booking>(&query)
            .bind(now)
            .bind(BookingStatus::Confirmed.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(bookings)
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let query = format!(
            "INSERT INTO bookings (event_id, user_id, status, created_at, confirm_deadline)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {BOOKING_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Booking>(&query)
            .bind(booking.event_id)
            .bind(booking.user_id)
            .bind(BookingStatus::Created.as_str())
            .bind(booking.created_at)
            .bind(booking.confirm_deadline)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(created)
    }

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_booking(&mut self, booking_id: i64) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn adjust_available_seats(&mut self, event_id: i64, delta: i32) -> Result<(), StoreError> {
        // Граница проверяется в самом UPDATE, чтобы счётчик не ушёл за 0..=total_seats
        let updated = sqlx::query_scalar::<_, i32>(
            "UPDATE events
             SET available_seats = available_seats + $2
             WHERE id = $1
               AND available_seats + $2 >= 0
               AND available_seats + $2 <= total_seats
             RETURNING available_seats",
        )
        .bind(event_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        if updated.is_some() {
            return Ok(());
        }
        if self.event_exists(event_id).await? {
            Err(StoreError::Integrity(format!(
                "seat counter of event {event_id} cannot move by {delta}"
            )))
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn delete_event(&mut self, event_id: i64) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *self.tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
