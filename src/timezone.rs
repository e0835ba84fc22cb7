//! Repair of stored schedule times that predate the canonical-zone
//! convention.
//!
//! Early versions of the bot wrote `scheduled_at` as whatever wall-clock
//! string the client produced, sometimes zoneless, sometimes in a stray
//! offset. The repair pass rewrites every such row as RFC 3339 in the
//! canonical zone. It runs on demand (see `src/bin/normalize-timezones.rs`)
//! and is safe to run repeatedly.

use crate::db::Connection;
use crate::db::notifications::ScheduledTime;
use anyhow::Result;
use chrono::Offset;
use chrono_tz::Tz;

/// Rewrites every active notification whose `scheduled_at` lacks a zone tag
/// or carries one other than `zone`'s, optionally restricted to a single
/// recipient. Returns the number of rows rewritten; a second run over the
/// same rows rewrites nothing.
pub async fn normalize_scheduled_times(
    conn: &mut dyn Connection,
    zone: Tz,
    recipient: Option<i64>,
) -> Result<usize> {
    let notifications = match recipient {
        Some(recipient_id) => conn.notifications_for_recipient(recipient_id, false).await?,
        None => conn.active_notifications().await?,
    };

    let mut repaired = 0;
    for notification in notifications {
        let corrected = match &notification.scheduled_at {
            ScheduledTime::Zoned(dt) => {
                let canonical = dt.with_timezone(&zone);
                if canonical.offset().fix() == *dt.offset() {
                    continue;
                }
                canonical.fixed_offset()
            }
            // Zoneless rows were written as UTC wall-clock time.
            ScheduledTime::Naive(naive) => naive.and_utc().with_timezone(&zone).fixed_offset(),
            ScheduledTime::Invalid(raw) => {
                tracing::warn!(
                    "notification {} has unparseable scheduled_at {raw:?}, cannot repair",
                    notification.id
                );
                continue;
            }
        };
        if conn.fix_timezone(notification.id, &corrected).await? {
            repaired += 1;
        } else {
            tracing::warn!(
                "notification {} vanished during timezone repair",
                notification.id
            );
        }
    }

    Ok(repaired)
}
