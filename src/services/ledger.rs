//! ledger.rs
//!
//! Менеджер транзакций над счётчиком мест.
//!
//! Каждый переход состояния проходит по одной схеме:
//! 1.  открыть транзакцию и прочитать строку с блокировкой (`FOR UPDATE`);
//! 2.  отдать снимок строки в `body`, который только проверяет правила и
//!     возвращает список записей (`LedgerWrite`);
//! 3.  применить записи и закоммитить.
//!
//! Отказ `body` или любая ошибка записи откатывает транзакцию целиком.
//! Две брони одного события сериализуются на блокировке строки события,
//! это единственная защита от овербукинга.

use std::sync::Arc;
use tracing::{error, warn};

use crate::error::{BookingError, StoreError};
use crate::models::{Booking, BookingStatus, Event, NewBooking};
use crate::store::{Ledger, LedgerTx};

/// Запись, которую `body` просит выполнить под уже взятой блокировкой.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    CreateBooking(NewBooking),
    /// available_seats - 1
    HoldSeat { event_id: i64 },
    /// Блокирует событие и делает available_seats + 1.
    ReleaseSeat { event_id: i64 },
    SetBookingStatus { booking_id: i64, status: BookingStatus },
    DeleteBooking { booking_id: i64 },
    DeleteEvent { event_id: i64 },
}

/// Итог применённых записей.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    pub created: Option<Booking>,
    pub released_seats: usize,
    pub deleted_bookings: usize,
}

#[derive(Clone)]
pub struct SeatLedger {
    store: Arc<dyn Ledger>,
}

impl SeatLedger {
    pub fn new(store: Arc<dyn Ledger>) -> Self {
        Self { store }
    }

    /// Блокирует событие `event_id` и выполняет записи, которые вернул `body`.
    pub async fn with_locked_event<F>(
        &self,
        op: &'static str,
        event_id: i64,
        body: F,
    ) -> Result<Applied, BookingError>
    where
        F: FnOnce(&Event) -> Result<Vec<LedgerWrite>, BookingError> + Send,
    {
        let mut tx = self.begin(op).await?;
        let locked = tx.lock_event(event_id).await;
        let event = match locked {
            Ok(event) => event,
            Err(StoreError::NotFound) => return Err(abandon(tx, op, BookingError::EventNotFound).await),
            Err(e) => {
                let failure = internal(op, &e);
                return Err(abandon(tx, op, failure).await);
            }
        };

        match body(&event) {
            Ok(writes) => apply_and_commit(tx, op, writes).await,
            Err(rejection) => Err(abandon(tx, op, rejection).await),
        }
    }

    /// Блокирует бронь `booking_id` и выполняет записи, которые вернул `body`.
    pub async fn with_locked_booking<F>(
        &self,
        op: &'static str,
        booking_id: i64,
        body: F,
    ) -> Result<Applied, BookingError>
    where
        F: FnOnce(&Booking) -> Result<Vec<LedgerWrite>, BookingError> + Send,
    {
        let mut tx = self.begin(op).await?;
        let locked = tx.lock_booking(booking_id).await;
        let booking = match locked {
            Ok(booking) => booking,
            Err(StoreError::NotFound) => return Err(abandon(tx, op, BookingError::BookingNotFound).await),
            Err(e) => {
                let failure = internal(op, &e);
                return Err(abandon(tx, op, failure).await);
            }
        };

        match body(&booking) {
            Ok(writes) => apply_and_commit(tx, op, writes).await,
            Err(rejection) => Err(abandon(tx, op, rejection).await),
        }
    }

    /// Блокирует все просроченные неподтверждённые брони, освобождает их места
    /// и удаляет строки. Один коммит на всю пачку.
    pub async fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Applied, BookingError> {
        const OP: &str = "clean_expired_bookings";

        let mut tx = self.begin(OP).await?;
        let locked = tx.lock_expired_bookings(now).await;
        let expired = match locked {
            Ok(expired) => expired,
            Err(e) => {
                let failure = internal(OP, &e);
                return Err(abandon(tx, OP, failure).await);
            }
        };
        if expired.is_empty() {
            rollback_quietly(tx, OP).await;
            return Ok(Applied::default());
        }

        for booking in &expired {
            tracing::debug!(
                booking_id = booking.id,
                event_id = booking.event_id,
                status = %booking.status,
                "removing expired booking"
            );
        }
        apply_and_commit(tx, OP, expiry_writes(&expired)).await
    }

    async fn begin(&self, op: &'static str) -> Result<Box<dyn LedgerTx>, BookingError> {
        self.store.begin().await.map_err(|e| internal(op, &e))
    }
}

/// Записи для пачки просроченных броней. Отменённая бронь уже вернула своё
/// место, поэтому для неё только удаление строки.
pub fn expiry_writes(expired: &[Booking]) -> Vec<LedgerWrite> {
    expired
        .iter()
        .flat_map(|booking| {
            let release = (booking.status != BookingStatus::Cancelled)
                .then_some(LedgerWrite::ReleaseSeat { event_id: booking.event_id });
            release
                .into_iter()
                .chain(std::iter::once(LedgerWrite::DeleteBooking { booking_id: booking.id }))
        })
        .collect()
}

async fn apply_and_commit(
    mut tx: Box<dyn LedgerTx>,
    op: &'static str,
    writes: Vec<LedgerWrite>,
) -> Result<Applied, BookingError> {
    let mut applied = Applied::default();
    for write in writes {
        let result = apply(tx.as_mut(), write, &mut applied).await;
        if let Err(e) = result {
            let failure = internal(op, &e);
            return Err(abandon(tx, op, failure).await);
        }
    }
    tx.commit().await.map_err(|e| internal(op, &e))?;
    Ok(applied)
}

async fn apply(tx: &mut dyn LedgerTx, write: LedgerWrite, applied: &mut Applied) -> Result<(), StoreError> {
    match write {
        LedgerWrite::CreateBooking(booking) => {
            applied.created = Some(tx.insert_booking(&booking).await?);
        }
        LedgerWrite::HoldSeat { event_id } => {
            tx.adjust_available_seats(event_id, -1).await?;
        }
        LedgerWrite::ReleaseSeat { event_id } => {
            match tx.lock_event(event_id).await {
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    return Err(StoreError::Integrity(format!(
                        "booking references missing event {event_id}"
                    )))
                }
                Err(e) => return Err(e),
            }
            tx.adjust_available_seats(event_id, 1).await?;
            applied.released_seats += 1;
        }
        LedgerWrite::SetBookingStatus { booking_id, status } => {
            tx.set_booking_status(booking_id, status).await?;
        }
        LedgerWrite::DeleteBooking { booking_id } => {
            tx.delete_booking(booking_id).await?;
            applied.deleted_bookings += 1;
        }
        LedgerWrite::DeleteEvent { event_id } => {
            tx.delete_event(event_id).await?;
        }
    }
    Ok(())
}

/// Откатывает транзакцию и возвращает причину отказа как есть.
async fn abandon(tx: Box<dyn LedgerTx>, op: &'static str, reason: BookingError) -> BookingError {
    rollback_quietly(tx, op).await;
    reason
}

async fn rollback_quietly(tx: Box<dyn LedgerTx>, op: &'static str) {
    if let Err(e) = tx.rollback().await {
        warn!(op, error = %e, "rollback failed");
    }
}

/// Настоящая причина остаётся в логе, наружу уходит только `Internal`.
fn internal(op: &'static str, err: &StoreError) -> BookingError {
    match err {
        StoreError::Integrity(detail) => error!(op, %detail, "ledger integrity violation"),
        other => error!(op, error = %other, "ledger operation failed"),
    }
    BookingError::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventStatus, NewBooking};
    use crate::store::MemoryLedger;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 10, 0, 0).unwrap()
    }

    fn seeded(total: i32, available: i32) -> (MemoryLedger, SeatLedger, i64) {
        let store = MemoryLedger::new();
        let event_id = store.seed_event(Event {
            id: 0,
            title: "Play".into(),
            description: String::new(),
            status: EventStatus::Actual,
            event_date: now() + Duration::days(1),
            booking_window: 60,
            total_seats: total,
            available_seats: available,
            created_at: now(),
        });
        let ledger = SeatLedger::new(Arc::new(store.clone()));
        (store, ledger, event_id)
    }

    fn booking(id: i64, status: BookingStatus) -> Booking {
        Booking {
            id,
            event_id: 9,
            user_id: 1,
            status,
            created_at: now(),
            confirm_deadline: Some(now()),
        }
    }

    #[tokio::test]
    async fn applies_requested_writes_and_commits() {
        let (store, ledger, event_id) = seeded(3, 3);

        let applied = ledger
            .with_locked_event("test", event_id, |event| {
                Ok(vec![
                    LedgerWrite::CreateBooking(NewBooking {
                        event_id: event.id,
                        user_id: 5,
                        created_at: now(),
                        confirm_deadline: now() + Duration::seconds(event.booking_window),
                    }),
                    LedgerWrite::HoldSeat { event_id: event.id },
                ])
            })
            .await
            .unwrap();

        let created = applied.created.expect("booking created");
        assert_eq!(store.booking(created.id).unwrap().status, BookingStatus::Created);
        assert_eq!(store.event(event_id).unwrap().available_seats, 2);
    }

    #[tokio::test]
    async fn rejection_from_body_is_returned_verbatim() {
        let (store, ledger, event_id) = seeded(1, 1);

        let err = ledger
            .with_locked_event("test", event_id, |_| Err(BookingError::EventBusy))
            .await
            .unwrap_err();

        assert_eq!(err, BookingError::EventBusy);
        assert_eq!(store.event(event_id).unwrap().available_seats, 1);
    }

    #[tokio::test]
    async fn failing_write_rolls_back_the_whole_batch() {
        let (store, ledger, event_id) = seeded(2, 1);

        let err = ledger
            .with_locked_event("test", event_id, |event| {
                Ok(vec![
                    LedgerWrite::HoldSeat { event_id: event.id },
                    LedgerWrite::HoldSeat { event_id: event.id },
                ])
            })
            .await
            .unwrap_err();

        assert_eq!(err, BookingError::Internal);
        assert_eq!(store.event(event_id).unwrap().available_seats, 1);
    }

    #[tokio::test]
    async fn missing_rows_map_to_not_found() {
        let (_, ledger, _) = seeded(1, 1);

        let err = ledger
            .with_locked_event("test", 999, |_| Ok(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::EventNotFound);

        let err = ledger
            .with_locked_booking("test", 999, |_| Ok(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::BookingNotFound);
    }

    #[tokio::test]
    async fn releasing_a_seat_of_a_missing_event_is_internal() {
        let (_, ledger, event_id) = seeded(1, 0);

        let err = ledger
            .with_locked_event("test", event_id, |_| Ok(vec![LedgerWrite::ReleaseSeat { event_id: 404 }]))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::Internal);
    }

    #[test]
    fn cancelled_bookings_are_deleted_without_a_release() {
        let writes = expiry_writes(&[
            booking(1, BookingStatus::Created),
            booking(2, BookingStatus::Cancelled),
        ]);
        assert_eq!(
            writes,
            vec![
                LedgerWrite::ReleaseSeat { event_id: 9 },
                LedgerWrite::DeleteBooking { booking_id: 1 },
                LedgerWrite::DeleteBooking { booking_id: 2 },
            ]
        );
    }
}
