//! Random operation sequences must keep the seat counter equal to
//! `total - live bookings`, inside `0..=total`, and never move a booking
//! out of a terminal status.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use seat_ledger::clock::ManualClock;
use seat_ledger::error::BookingError;
use seat_ledger::models::{BookingStatus, Event, EventStatus};
use seat_ledger::services::BookingService;
use seat_ledger::store::MemoryLedger;

#[derive(Debug, Clone)]
enum Op {
    Book { user: i64 },
    Confirm { pick: usize, user: i64 },
    Cancel { pick: usize, user: i64 },
    Advance { secs: i64 },
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i64..=3).prop_map(|user| Op::Book { user }),
        2 => (any::<usize>(), 1i64..=3).prop_map(|(pick, user)| Op::Confirm { pick, user }),
        2 => (any::<usize>(), 1i64..=3).prop_map(|(pick, user)| Op::Cancel { pick, user }),
        1 => (1i64..=90).prop_map(|secs| Op::Advance { secs }),
        1 => Just(Op::Sweep),
    ]
}

/// Last observed state of an issued booking; `None` once the sweeper removed it.
struct Issued {
    owner: i64,
    status: Option<BookingStatus>,
}

fn already(status: BookingStatus) -> BookingError {
    match status {
        BookingStatus::Confirmed => BookingError::BookingAlreadyConfirmed,
        _ => BookingError::BookingAlreadyCancelled,
    }
}

/// A second confirm/cancel on a finished booking never succeeds. The owner
/// gets the matching already-X error, a removed booking is not found.
fn check_repeat(
    issued: &Issued,
    user: i64,
    result: &Result<(), BookingError>,
) -> Result<(), TestCaseError> {
    match issued.status {
        None => prop_assert_eq!(result, &Err(BookingError::BookingNotFound)),
        Some(status) if status.is_terminal() => {
            prop_assert!(result.is_err(), "terminal booking changed: {:?}", status);
            if user == issued.owner {
                prop_assert_eq!(result, &Err(already(status)));
            }
        }
        Some(_) => {}
    }
    Ok(())
}

fn run(seats: i32, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    runtime.block_on(async move {
        let start = Utc.with_ymd_and_hms(2033, 1, 1, 0, 0, 0).unwrap();
        let store = MemoryLedger::new();
        let clock = Arc::new(ManualClock::new(start));
        let service = BookingService::new(Arc::new(store.clone()), clock.clone());
        let event_id = store.seed_event(Event {
            id: 0,
            title: "Gig".into(),
            description: String::new(),
            status: EventStatus::Actual,
            event_date: start + Duration::days(30),
            booking_window: 60,
            total_seats: seats,
            available_seats: seats,
            created_at: start,
        });

        let mut order: Vec<i64> = Vec::new();
        let mut issued: HashMap<i64, Issued> = HashMap::new();
        for op in ops {
            match op {
                Op::Book { user } => {
                    if let Ok(booking) = service.book_event(event_id, user).await {
                        order.push(booking.id);
                        issued.insert(
                            booking.id,
                            Issued {
                                owner: user,
                                status: Some(booking.status),
                            },
                        );
                    }
                }
                Op::Confirm { pick, user } if !order.is_empty() => {
                    let id = order[pick % order.len()];
                    let result = service.confirm_booking(id, user).await;
                    check_repeat(&issued[&id], user, &result)?;
                }
                Op::Cancel { pick, user } if !order.is_empty() => {
                    let id = order[pick % order.len()];
                    let result = service.cancel_booking(id, user).await;
                    check_repeat(&issued[&id], user, &result)?;
                }
                Op::Advance { secs } => clock.advance(Duration::seconds(secs)),
                Op::Sweep => {
                    service
                        .clean_expired_bookings()
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
                _ => {}
            }

            let event = store
                .event(event_id)
                .ok_or_else(|| TestCaseError::fail("event vanished"))?;
            let bookings = store.bookings();
            let live = bookings
                .iter()
                .filter(|b| b.status != BookingStatus::Cancelled)
                .count() as i32;

            prop_assert!((0..=event.total_seats).contains(&event.available_seats));
            prop_assert_eq!(event.available_seats, event.total_seats - live);

            for (id, seen) in issued.iter_mut() {
                let now = bookings.iter().find(|b| b.id == *id).map(|b| b.status);
                match (seen.status, now) {
                    (Some(BookingStatus::Confirmed), current) => {
                        prop_assert_eq!(current, Some(BookingStatus::Confirmed), "booking {}", id);
                    }
                    (Some(prev), Some(current)) if prev.is_terminal() => {
                        prop_assert_eq!(current, prev, "booking {}", id);
                    }
                    (None, current) => prop_assert_eq!(current, None, "booking {} came back", id),
                    _ => {}
                }
                seen.status = now;
            }
        }
        Ok::<(), TestCaseError>(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seat_counter_and_lifecycle_stay_consistent(seats in 1i32..=4, ops in prop::collection::vec(op(), 1..60)) {
        run(seats, ops)?;
    }
}
