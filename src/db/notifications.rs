//! The `notifications` table holds one row per scheduled reminder.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::Serialize;

/// A scheduled text delivery to one recipient at one point in time.
///
/// `id` is the sole identity; duplicate (recipient, time, text) rows are
/// permitted. `is_sent` transitions false -> true at most once and never
/// back. Rows are never physically deleted, only flagged via `is_deleted`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub text: String,
    pub scheduled_at: ScheduledTime,
    pub created_at: DateTime<FixedOffset>,
    pub is_sent: bool,
    pub is_deleted: bool,
}

impl Notification {
    /// Whether this reminder should be delivered at `now`. Also true for
    /// arbitrarily overdue rows: late reminders go out late, they are not
    /// dropped.
    pub fn is_due(&self, now: &DateTime<Utc>) -> bool {
        !self.is_sent
            && !self.is_deleted
            && self.scheduled_at.instant().is_some_and(|at| at <= *now)
    }
}

/// The parsed form of a stored `scheduled_at` value.
///
/// Rows written by this code are always `Zoned` (RFC 3339 with an offset).
/// `Naive` covers rows from the legacy format that carried no zone tag; they
/// are compared under the stored-naive-as-UTC convention until the timezone
/// repair pass rewrites them. `Invalid` rows never become due.
#[derive(Debug, Clone, Serialize)]
pub enum ScheduledTime {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
    Invalid(String),
}

// Formats legacy writers used for zoneless wall-clock times.
static NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

impl ScheduledTime {
    pub fn parse(raw: &str) -> ScheduledTime {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return ScheduledTime::Zoned(dt);
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return ScheduledTime::Naive(naive);
            }
        }
        ScheduledTime::Invalid(raw.to_string())
    }

    /// The instant this value denotes, if it denotes one at all.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            ScheduledTime::Zoned(dt) => Some(dt.with_timezone(&Utc)),
            ScheduledTime::Naive(naive) => Some(naive.and_utc()),
            ScheduledTime::Invalid(_) => None,
        }
    }

    /// The exact text stored (or to be stored) in the `scheduled_at` column.
    pub fn to_stored(&self) -> String {
        match self {
            ScheduledTime::Zoned(dt) => dt.to_rfc3339(),
            ScheduledTime::Naive(naive) => naive.format("%Y-%m-%d %H:%M:%S").to_string(),
            ScheduledTime::Invalid(raw) => raw.clone(),
        }
    }
}
