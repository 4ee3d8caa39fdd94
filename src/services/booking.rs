//! booking.rs
//!
//! Сервис жизненного цикла брони: создание, подтверждение, отмена, удаление
//! события. Вся работа со счётчиком мест идёт через `SeatLedger`, сервис
//! только проверяет бизнес-правила над заблокированным снимком строки.

use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use super::cleanup::SweepReport;
use super::ledger::{LedgerWrite, SeatLedger};
use crate::clock::Clock;
use crate::error::BookingError;
use crate::models::{Booking, BookingStatus, Event, NewBooking, NewEvent, Role};
use crate::store::{EventFilter, Ledger};

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Ledger>,
    ledger: SeatLedger,
    clock: Arc<dyn Clock>,
    cancel_requires_owner: bool,
}

impl BookingService {
    pub fn new(store: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: SeatLedger::new(Arc::clone(&store)),
            store,
            clock,
            cancel_requires_owner: true,
        }
    }

    /// Проверять ли владельца брони при отмене. Выключение оставляет
    /// отмену чужой брони возможной (с предупреждением в логе).
    pub fn with_cancel_requires_owner(mut self, enforce: bool) -> Self {
        self.cancel_requires_owner = enforce;
        self
    }

    /// Создание события, только для админа.
    pub async fn create_event(&self, mut event: NewEvent, role: Role) -> Result<Event, BookingError> {
        if !role.is_admin() {
            return Err(BookingError::AccessDenied);
        }

        event.title = event.title.trim().to_string();
        event
            .validate()
            .map_err(|e| BookingError::IncompleteEvent(e.to_string()))?;

        let now = self.clock.now();
        if event.event_date < now {
            return Err(BookingError::EventInPast);
        }

        let created = self.store.create_event(&event, now).await.map_err(|e| {
            error!(op = "create_event", error = %e, "failed to create event");
            BookingError::Internal
        })?;

        info!(event_id = created.id, seats = created.total_seats, "event created");
        Ok(created)
    }

    /// Бронирование одного места: блокируем событие, проверяем, создаём бронь
    /// и уменьшаем счётчик в одной транзакции.
    pub async fn book_event(&self, event_id: i64, user_id: i64) -> Result<Booking, BookingError> {
        if event_id <= 0 {
            return Err(BookingError::InvalidEventId);
        }
        if user_id <= 0 {
            return Err(BookingError::InvalidUserId);
        }

        let now = self.clock.now();
        let applied = self
            .ledger
            .with_locked_event("book_event", event_id, |event| {
                if !event.is_bookable_at(now) {
                    return Err(BookingError::EventExpired);
                }
                if event.available_seats <= 0 {
                    return Err(BookingError::NoSeatsAvailable);
                }

                let deadline = TimeDelta::try_seconds(event.booking_window)
                    .and_then(|window| now.checked_add_signed(window))
                    .ok_or_else(|| {
                        error!(event_id = event.id, window = event.booking_window, "booking window out of range");
                        BookingError::Internal
                    })?;

                Ok(vec![
                    LedgerWrite::CreateBooking(NewBooking {
                        event_id: event.id,
                        user_id,
                        created_at: now,
                        confirm_deadline: deadline,
                    }),
                    LedgerWrite::HoldSeat { event_id: event.id },
                ])
            })
            .await?;

        let booking = applied.created.ok_or_else(|| {
            error!(event_id, "booking insert returned no row");
            BookingError::Internal
        })?;

        info!(booking_id = booking.id, event_id, user_id, "seat held");
        Ok(booking)
    }

    pub async fn confirm_booking(&self, booking_id: i64, user_id: i64) -> Result<(), BookingError> {
        if booking_id <= 0 {
            return Err(BookingError::InvalidBookingId);
        }
        if user_id <= 0 {
            return Err(BookingError::InvalidUserId);
        }

        let now = self.clock.now();
        self.ledger
            .with_locked_booking("confirm_booking", booking_id, |booking| {
                if booking.user_id != user_id {
                    return Err(BookingError::AccessDenied);
                }
                reject_terminal(booking.status)?;
                if booking.is_expired_at(now) {
                    return Err(BookingError::BookingExpired);
                }
                Ok(vec![LedgerWrite::SetBookingStatus {
                    booking_id: booking.id,
                    status: BookingStatus::Confirmed,
                }])
            })
            .await?;

        info!(booking_id, user_id, "booking confirmed");
        Ok(())
    }

    /// Отмена брони возвращает место в счётчик события.
    pub async fn cancel_booking(&self, booking_id: i64, user_id: i64) -> Result<(), BookingError> {
        if booking_id <= 0 {
            return Err(BookingError::InvalidBookingId);
        }
        if user_id <= 0 {
            return Err(BookingError::InvalidUserId);
        }

        let enforce_owner = self.cancel_requires_owner;
        self.ledger
            .with_locked_booking("cancel_booking", booking_id, |booking| {
                if enforce_owner && booking.user_id != user_id {
                    return Err(BookingError::AccessDenied);
                }
                reject_terminal(booking.status)?;
                if booking.user_id != user_id {
                    warn!(booking_id, owner = booking.user_id, requester = user_id, "booking cancelled by non-owner");
                }
                Ok(vec![
                    LedgerWrite::ReleaseSeat { event_id: booking.event_id },
                    LedgerWrite::SetBookingStatus {
                        booking_id: booking.id,
                        status: BookingStatus::Cancelled,
                    },
                ])
            })
            .await?;

        info!(booking_id, user_id, "booking cancelled, seat released");
        Ok(())
    }

    /// Удалить можно только событие без удерживаемых и подтверждённых мест.
    pub async fn delete_event(&self, event_id: i64, role: Role) -> Result<(), BookingError> {
        if !role.is_admin() {
            return Err(BookingError::AccessDenied);
        }
        if event_id <= 0 {
            return Err(BookingError::InvalidEventId);
        }

        self.ledger
            .with_locked_event("delete_event", event_id, |event| {
                if !event.is_idle() {
                    return Err(BookingError::EventBusy);
                }
                Ok(vec![LedgerWrite::DeleteEvent { event_id: event.id }])
            })
            .await?;

        info!(event_id, "event deleted");
        Ok(())
    }

    /// Вызывается только из фоновой очистки.
    pub async fn clean_expired_bookings(&self) -> Result<SweepReport, BookingError> {
        let applied = self.ledger.sweep_expired(self.clock.now()).await?;
        Ok(SweepReport {
            released_seats: applied.released_seats,
            deleted_bookings: applied.deleted_bookings,
        })
    }

    /// Админ видит все события, остальные только актуальные и будущие.
    pub async fn list_events(&self, role: Role) -> Result<Vec<Event>, BookingError> {
        let filter = if role.is_admin() {
            EventFilter::All
        } else {
            EventFilter::UpcomingAt(self.clock.now())
        };

        self.store.list_events(filter).await.map_err(|e| {
            error!(op = "list_events", error = %e, "failed to list events");
            BookingError::Internal
        })
    }

    pub async fn list_user_bookings(&self, user_id: i64) -> Result<Vec<Booking>, BookingError> {
        if user_id <= 0 {
            return Err(BookingError::InvalidUserId);
        }

        self.store.list_bookings_by_user(user_id).await.map_err(|e| {
            error!(op = "list_user_bookings", error = %e, "failed to list bookings");
            BookingError::Internal
        })
    }
}

fn reject_terminal(status: BookingStatus) -> Result<(), BookingError> {
    if !status.is_terminal() {
        return Ok(());
    }
    Err(match status {
        BookingStatus::Confirmed => BookingError::BookingAlreadyConfirmed,
        _ => BookingError::BookingAlreadyCancelled,
    })
}
