//! Хранилище в памяти процесса с тем же контрактом блокировок, что и Postgres.
//!
//! У каждой строки свой `tokio::sync::Mutex`. Транзакция держит guard каждой
//! прочитанной с блокировкой или изменённой строки до commit/rollback.
//! Записи копятся внутри транзакции и публикуются одним шагом при commit,
//! другие транзакции видят только закоммиченные строки.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use super::{EventFilter, Ledger, LedgerTx};
use crate::error::StoreError;
use crate::models::{Booking, BookingStatus, Event, EventStatus, NewBooking, NewEvent};

#[derive(Default)]
struct Tables {
    events: BTreeMap<i64, Event>,
    bookings: BTreeMap<i64, Booking>,
    event_seq: i64,
    booking_seq: i64,
}

/// Мьютексы строк. Запись живёт, пока строку кто-то держит или ждёт.
#[derive(Default)]
struct RowLocks {
    rows: Mutex<HashMap<i64, Arc<RowMutex<()>>>>,
}

impl RowLocks {
    fn rows(&self) -> MutexGuard<'_, HashMap<i64, Arc<RowMutex<()>>>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, id: i64) -> OwnedMutexGuard<()> {
        let row = Arc::clone(self.rows().entry(id).or_default());
        row.lock_owned().await
    }

    /// Убирает записи, на которые остался только сам словарь. Ожидающий
    /// клонирует `Arc` под тем же локом, поэтому его запись не пропадёт.
    fn prune(&self, ids: impl IntoIterator<Item = i64>) {
        let mut rows = self.rows();
        for id in ids {
            if rows.get(&id).is_some_and(|row| Arc::strong_count(row) == 1) {
                rows.remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows().len()
    }
}

/// Блокировки строк одной транзакции. Отпускаются при drop, в том числе
/// когда транзакцию бросили без commit/rollback.
struct HeldRows {
    locks: Arc<RowLocks>,
    guards: HashMap<i64, OwnedMutexGuard<()>>,
}

impl HeldRows {
    fn new(locks: &Arc<RowLocks>) -> Self {
        Self {
            locks: Arc::clone(locks),
            guards: HashMap::new(),
        }
    }

    async fn hold(&mut self, id: i64) {
        if !self.guards.contains_key(&id) {
            let guard = self.locks.acquire(id).await;
            self.guards.insert(id, guard);
        }
    }
}

impl Drop for HeldRows {
    fn drop(&mut self) {
        let ids: Vec<i64> = self.guards.drain().map(|(id, _guard)| id).collect();
        self.locks.prune(ids);
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    event_locks: Arc<RowLocks>,
    booking_locks: Arc<RowLocks>,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Кладёт событие как есть, минуя валидацию. Возвращает присвоенный id.
    pub fn seed_event(&self, mut event: Event) -> i64 {
        let mut tables = self.inner.tables();
        tables.event_seq += 1;
        event.id = tables.event_seq;
        tables.events.insert(event.id, event);
        tables.event_seq
    }

    /// Закоммиченное состояние события.
    pub fn event(&self, event_id: i64) -> Option<Event> {
        self.inner.tables().events.get(&event_id).cloned()
    }

    /// Закоммиченное состояние брони.
    pub fn booking(&self, booking_id: i64) -> Option<Booking> {
        self.inner.tables().bookings.get(&booking_id).cloned()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.inner.tables().bookings.values().cloned().collect()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            event_guards: HeldRows::new(&self.inner.event_locks),
            booking_guards: HeldRows::new(&self.inner.booking_locks),
            events: HashMap::new(),
            bookings: HashMap::new(),
        }))
    }

    async fn create_event(&self, event: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError> {
        let mut tables = self.inner.tables();
        tables.event_seq += 1;
        let created = Event {
            id: tables.event_seq,
            title: event.title.clone(),
            description: event.description.clone(),
            status: EventStatus::Actual,
            event_date: event.event_date,
            booking_window: event.booking_window,
            total_seats: event.total_seats,
            available_seats: event.total_seats,
            created_at: now,
        };
        tables.events.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let tables = self.inner.tables();
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| match filter {
                EventFilter::All => true,
                EventFilter::UpcomingAt(now) => e.status == EventStatus::Actual && e.event_date > now,
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.event_date, e.id));
        Ok(events)
    }

    async fn list_bookings_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        let tables = self.inner.tables();
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(bookings)
    }
}

struct MemoryTx {
    inner: Arc<Inner>,
    event_guards: HeldRows,
    booking_guards: HeldRows,
    // None означает удаление строки в этой транзакции
    events: HashMap<i64, Option<Event>>,
    bookings: HashMap<i64, Option<Booking>>,
}

impl MemoryTx {
    async fn hold_event(&mut self, event_id: i64) {
        self.event_guards.hold(event_id).await;
    }

    async fn hold_booking(&mut self, booking_id: i64) {
        self.booking_guards.hold(booking_id).await;
    }

    fn read_event(&self, event_id: i64) -> Option<Event> {
        match self.events.get(&event_id) {
            Some(staged) => staged.clone(),
            None => self.inner.tables().events.get(&event_id).cloned(),
        }
    }

    fn read_booking(&self, booking_id: i64) -> Option<Booking> {
        match self.bookings.get(&booking_id) {
            Some(staged) => staged.clone(),
            None => self.inner.tables().bookings.get(&booking_id).cloned(),
        }
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_event(&mut self, event_id: i64) -> Result<Event, StoreError> {
        self.hold_event(event_id).await;
        self.read_event(event_id).ok_or(StoreError::NotFound)
    }

    async fn lock_booking(&mut self, booking_id: i64) -> Result<Booking, StoreError> {
        self.hold_booking(booking_id).await;
        self.read_booking(booking_id).ok_or(StoreError::NotFound)
    }

    async fn lock_expired_bookings(&mut self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let mut ids: Vec<i64> = {
            let tables = self.inner.tables();
            tables
                .bookings
                .values()
                .filter(|b| b.is_sweepable_at(now))
                .map(|b| b.id)
                .collect()
        };
        ids.extend(
            self.bookings
                .values()
                .flatten()
                .filter(|b| b.is_sweepable_at(now))
                .map(|b| b.id),
        );
        ids.sort_unstable();
        ids.dedup();

        // Блокируем по порядку id и перепроверяем строку уже под блокировкой
        let mut locked = Vec::with_capacity(ids.len());
        for id in ids {
            self.hold_booking(id).await;
            if let Some(booking) = self.read_booking(id) {
                if booking.is_sweepable_at(now) {
                    locked.push(booking);
                }
            }
        }
        Ok(locked)
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError> {
        if self.read_event(booking.event_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "booking references missing event {}",
                booking.event_id
            )));
        }
        let id = {
            let mut tables = self.inner.tables();
            tables.booking_seq += 1;
            tables.booking_seq
        };
        self.hold_booking(id).await;

        let created = Booking {
            id,
            event_id: booking.event_id,
            user_id: booking.user_id,
            status: BookingStatus::Created,
            created_at: booking.created_at,
            confirm_deadline: Some(booking.confirm_deadline),
        };
        self.bookings.insert(id, Some(created.clone()));
        Ok(created)
    }

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> Result<(), StoreError> {
        self.hold_booking(booking_id).await;
        let mut booking = self.read_booking(booking_id).ok_or(StoreError::NotFound)?;
        booking.status = status;
        self.bookings.insert(booking_id, Some(booking));
        Ok(())
    }

    async fn delete_booking(&mut self, booking_id: i64) -> Result<(), StoreError> {
        self.hold_booking(booking_id).await;
        if self.read_booking(booking_id).is_none() {
            return Err(StoreError::NotFound);
        }
        self.bookings.insert(booking_id, None);
        Ok(())
    }

    async fn adjust_available_seats(&mut self, event_id: i64, delta: i32) -> Result<(), StoreError> {
        self.hold_event(event_id).await;
        let mut event = self.read_event(event_id).ok_or(StoreError::NotFound)?;
        let next = event.available_seats + delta;
        if !(0..=event.total_seats).contains(&next) {
            return Err(StoreError::Integrity(format!(
                "seat counter of event {event_id} cannot move by {delta}"
            )));
        }
        event.available_seats = next;
        self.events.insert(event_id, Some(event));
        Ok(())
    }

    async fn delete_event(&mut self, event_id: i64) -> Result<(), StoreError> {
        self.hold_event(event_id).await;
        if self.read_event(event_id).is_none() {
            return Err(StoreError::NotFound);
        }
        self.events.insert(event_id, None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            inner,
            event_guards,
            booking_guards,
            events,
            bookings,
        } = *self;

        let mut tables = inner.tables();
        let mut deleted_events = Vec::new();
        for (id, row) in events {
            match row {
                Some(event) => {
                    tables.events.insert(id, event);
                }
                None => {
                    tables.events.remove(&id);
                    deleted_events.push(id);
                }
            }
        }
        for (id, row) in bookings {
            match row {
                Some(booking) => {
                    tables.bookings.insert(id, booking);
                }
                None => {
                    tables.bookings.remove(&id);
                }
            }
        }
        // ON DELETE CASCADE
        if !deleted_events.is_empty() {
            tables.bookings.retain(|_, b| !deleted_events.contains(&b.event_id));
        }
        drop(tables);

        drop(booking_guards);
        drop(event_guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
