//! The notification delivery loop.
//!
//! A single cooperative task per process. It waits for the chat client to
//! come up, then wakes at every wall-clock minute boundary, queries the store
//! for due notifications and dispatches them one at a time. A failed delivery
//! is logged and left unsent; the row becomes due again on the next boundary,
//! which is the system's whole retry mechanism.

use crate::Context;
use crate::db::Connection;
use crate::db::notifications::Notification;
use crate::delivery::{DeliveryError, Sender};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

// How long the loop polls for a sender before giving up. The chat client
// connects from a separate task and is usually ready within a second or two.
pub const SENDER_WAIT_ATTEMPTS: usize = 30;
pub const SENDER_WAIT_INTERVAL: Duration = Duration::from_secs(2);

// Upper bound on a single send, so a hung chat API cannot stall the cadence.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

// Pause after an iteration fails wholesale, before the loop re-arms.
pub const FAULT_COOLDOWN: Duration = Duration::from_secs(60);

// Consecutive unreachable deliveries after which a recipient is deactivated.
pub const UNREACHABLE_DEACTIVATION_THRESHOLD: i32 = 3;

pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let Some(sender) = ctx
        .sender
        .wait(SENDER_WAIT_ATTEMPTS, SENDER_WAIT_INTERVAL)
        .await
    else {
        tracing::error!(
            "no chat client became available after {SENDER_WAIT_ATTEMPTS} attempts, giving up"
        );
        anyhow::bail!("chat client never became available");
    };
    tracing::info!("scheduler armed");

    // One immediate pass, so reminders that came due while the process was
    // down go out now instead of waiting for the boundary.
    if let Err(e) = check_due(&ctx, &*sender).await {
        tracing::error!("due-check failed: {e:?}");
        tokio::time::sleep(FAULT_COOLDOWN).await;
    }

    loop {
        let pause = until_next_minute(&Utc::now());
        tracing::trace!("sleeping {}ms until the minute boundary", pause.as_millis());
        tokio::time::sleep(pause).await;

        if let Err(e) = check_due(&ctx, &*sender).await {
            tracing::error!("due-check failed: {e:?}");
            tokio::time::sleep(FAULT_COOLDOWN).await;
        }
    }
}

/// One Checking phase: query everything due and dispatch it in order. Only
/// whole-iteration problems (store unavailable, due-query failed) surface as
/// errors; per-item failures are contained in [`dispatch`].
async fn check_due(ctx: &Context, sender: &dyn Sender) -> Result<()> {
    let cycle = Uuid::new_v4();
    let span = tracing::info_span!("due_check", %cycle);
    async {
        let mut conn = ctx
            .db
            .connection()
            .await
            .context("skipping cycle, store unavailable")?;
        let due = conn
            .notifications_due(&Utc::now())
            .await
            .context("querying due notifications")?;
        if !due.is_empty() {
            tracing::debug!("{} notification(s) due", due.len());
        }
        for notification in &due {
            dispatch(&mut *conn, sender, notification).await;
        }
        Ok(())
    }
    .instrument(span)
    .await
}

/// Delivers one notification and records the outcome. Never propagates: a
/// single bad item must not abort the batch or the loop.
async fn dispatch(conn: &mut dyn Connection, sender: &dyn Sender, notification: &Notification) {
    let text = format_reminder(&notification.text);
    let outcome = match tokio::time::timeout(
        DISPATCH_TIMEOUT,
        sender.send_message(notification.recipient_id, &text),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(DeliveryError::Timeout),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = conn.clear_unreachable(notification.recipient_id).await {
                tracing::warn!(
                    "failed to reset unreachable count for recipient {}: {e:?}",
                    notification.recipient_id
                );
            }
            match conn.mark_sent(notification.id).await {
                Ok(true) => tracing::info!(
                    "delivered notification {} to recipient {}",
                    notification.id,
                    notification.recipient_id
                ),
                Ok(false) => tracing::warn!(
                    "notification {} was already marked sent, not re-sending",
                    notification.id
                ),
                Err(e) => tracing::error!(
                    "failed to mark notification {} sent: {e:?}",
                    notification.id
                ),
            }
        }
        Err(DeliveryError::Unreachable(reason)) => {
            tracing::warn!(
                "recipient {} unreachable: {reason}",
                notification.recipient_id
            );
            match conn.record_unreachable(notification.recipient_id).await {
                Ok(count) if count >= UNREACHABLE_DEACTIVATION_THRESHOLD => {
                    tracing::warn!(
                        "deactivating recipient {} after {count} consecutive unreachable deliveries",
                        notification.recipient_id
                    );
                    if let Err(e) = conn.deactivate_recipient(notification.recipient_id).await {
                        tracing::error!(
                            "failed to deactivate recipient {}: {e:?}",
                            notification.recipient_id
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(
                    "failed to record unreachable delivery for recipient {}: {e:?}",
                    notification.recipient_id
                ),
            }
        }
        Err(e) => {
            // The row stays unsent, so the next cycle picks it up again.
            tracing::warn!(
                "failed to deliver notification {} to recipient {}: {e}",
                notification.id,
                notification.recipient_id
            );
        }
    }
}

/// Marks a delivered message as a reminder. Presentation only.
pub fn format_reminder(text: &str) -> String {
    format!("\u{1F514} {text}")
}

/// Time remaining until the next wall-clock minute starts. Sleeping for this
/// long, rather than a fixed interval, keeps checks aligned to :00 seconds
/// and stops drift from accumulating across iterations.
pub fn until_next_minute(now: &DateTime<Utc>) -> Duration {
    let millis_into_minute = now.timestamp_millis().rem_euclid(60_000) as u64;
    Duration::from_millis(60_000 - millis_into_minute)
}
