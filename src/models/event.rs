use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::{fmt, str::FromStr};
use validator::Validate;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Actual,
    Expired,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Actual => "actual",
            EventStatus::Expired => "expired",
        }
    }
}

impl FromStr for EventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actual" => Ok(EventStatus::Actual),
            "expired" => Ok(EventStatus::Expired),
            _ => Err(ParseEnumError::new("event status", s)),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Событие вместе со счётчиком свободных мест.
///
/// `available_seats` меняется только внутри транзакции, держащей блокировку строки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: EventStatus,
    pub event_date: DateTime<Utc>,
    /// Seconds a new booking has to be confirmed.
    pub booking_window: i64,
    pub total_seats: i32,
    pub available_seats: i32,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Можно ли бронировать событие в момент `now`.
    pub fn is_bookable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Actual && self.event_date >= now
    }

    /// Нет ни одной удерживаемой или подтверждённой брони.
    pub fn is_idle(&self) -> bool {
        self.available_seats == self.total_seats
    }
}

impl<'r> FromRow<'r, PgRow> for Event {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Event {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: status
                .parse()
                .map_err(|e: ParseEnumError| sqlx::Error::Decode(Box::new(e)))?,
            event_date: row.try_get("event_date")?,
            booking_window: row.try_get("booking_window")?,
            total_seats: row.try_get("total_seats")?,
            available_seats: row.try_get("available_seats")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Данные для создания события (только для админа).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewEvent {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub event_date: DateTime<Utc>,
    #[validate(range(min = 1, message = "booking_window must be positive"))]
    pub booking_window: i64,
    #[validate(range(min = 1, message = "total_seats must be positive"))]
    pub total_seats: i32,
}
