use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::{fmt, str::FromStr};

use super::ParseEnumError;

/// created -> confirmed | cancelled, без обратных переходов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Created,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Created => "created",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Created)
    }
}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BookingStatus::Created),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(ParseEnumError::new("booking status", s)),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub confirm_deadline: Option<DateTime<Utc>>,
}

impl Booking {
    /// Срок подтверждения истёк к моменту `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.confirm_deadline.is_some_and(|deadline| deadline < now)
    }

    /// Попадает ли бронь под очистку: срок истёк и она не подтверждена.
    pub fn is_sweepable_at(&self, now: DateTime<Utc>) -> bool {
        self.status != BookingStatus::Confirmed && self.is_expired_at(now)
    }
}

impl<'r> FromRow<'r, PgRow> for Booking {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Booking {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            user_id: row.try_get("user_id")?,
            status: status
                .parse()
                .map_err(|e: ParseEnumError| sqlx::Error::Decode(Box::new(e)))?,
            created_at: row.try_get("created_at")?,
            confirm_deadline: row.try_get("confirm_deadline")?,
        })
    }
}

/// Новая бронь в статусе `created`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub event_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub confirm_deadline: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn booking(status: BookingStatus, deadline: Option<DateTime<Utc>>) -> Booking {
        Booking {
            id: 1,
            event_id: 1,
            user_id: 1,
            status,
            created_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            confirm_deadline: deadline,
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [BookingStatus::Created, BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("pending".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn only_created_is_open() {
        assert!(!BookingStatus::Created.is_terminal());
        assert!(BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn confirmed_bookings_are_never_sweepable() {
        let deadline = Utc.with_ymd_and_hms(2030, 1, 1, 0, 1, 0).unwrap();
        let later = deadline + Duration::seconds(1);

        assert!(booking(BookingStatus::Created, Some(deadline)).is_sweepable_at(later));
        assert!(booking(BookingStatus::Cancelled, Some(deadline)).is_sweepable_at(later));
        assert!(!booking(BookingStatus::Confirmed, Some(deadline)).is_sweepable_at(later));
        assert!(!booking(BookingStatus::Created, Some(deadline)).is_sweepable_at(deadline));
        assert!(!booking(BookingStatus::Created, None).is_sweepable_at(later));
    }
}
