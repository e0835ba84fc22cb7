use crate::db::Connection;
use anyhow::Result;
use chrono_tz::Tz;

/// Renders the "my reminders" view the conversational layer shows on
/// request: one numbered line per pending reminder, times in the canonical
/// zone.
pub async fn render(conn: &mut dyn Connection, recipient_id: i64, zone: Tz) -> Result<String> {
    let notifications = conn.notifications_for_recipient(recipient_id, false).await?;
    if notifications.is_empty() {
        return Ok("You have no pending reminders.".to_string());
    }

    let mut out = String::from("Your pending reminders:\n");
    for (idx, notification) in notifications.iter().enumerate() {
        let when = match notification.scheduled_at.instant() {
            Some(instant) => instant
                .with_timezone(&zone)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            // Rows awaiting timezone repair are shown as stored.
            None => notification.scheduled_at.to_stored(),
        };
        out.push_str(&format!("{}. [{when}] {}\n", idx + 1, notification.text));
    }
    Ok(out)
}
