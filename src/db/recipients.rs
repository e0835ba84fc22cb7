use serde::Serialize;

/// Where a reminder gets delivered. The conversational layer owns the user
/// lifecycle; the delivery core only needs the chat id and the reachability
/// bookkeeping attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub recipient_id: i64,
    pub username: String,
    pub is_active: bool,
    /// Consecutive "unreachable" delivery failures since the last success.
    pub unreachable_count: i32,
}
