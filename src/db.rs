use self::notifications::Notification;
use self::recipients::Recipient;
use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub mod notifications;
pub mod postgres;
pub mod recipients;

// How many times a connection is attempted before the caller is told the
// store is unavailable. The scheduler treats that as "skip this cycle".
const CONNECT_ATTEMPTS: usize = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The notification store: the sole source of truth for what is due.
///
/// Each method runs a single statement on a short-lived pooled connection; no
/// method holds the connection across unrelated awaits, so the store is safe
/// to call from concurrent dispatches.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // Recipients
    async fn record_recipient(&mut self, recipient_id: i64, username: &str) -> Result<()>;
    async fn get_recipient(&mut self, recipient_id: i64) -> Result<Option<Recipient>>;
    async fn deactivate_recipient(&mut self, recipient_id: i64) -> Result<()>;
    /// Bumps the consecutive-unreachable counter and returns the new value.
    async fn record_unreachable(&mut self, recipient_id: i64) -> Result<i32>;
    async fn clear_unreachable(&mut self, recipient_id: i64) -> Result<()>;

    // Notifications
    async fn create_notification(
        &mut self,
        recipient_id: i64,
        text: &str,
        scheduled_at: &DateTime<FixedOffset>,
    ) -> Result<i64>;
    /// All unsent, uncancelled notifications whose scheduled time is at or
    /// before `now`, however far in the past, for recipients that are still
    /// active. Ordered by scheduled time then id, earliest first.
    async fn notifications_due(&mut self, now: &DateTime<Utc>) -> Result<Vec<Notification>>;
    async fn notifications_for_recipient(
        &mut self,
        recipient_id: i64,
        include_sent: bool,
    ) -> Result<Vec<Notification>>;
    /// Flips `is_sent` false -> true. Returns false if the row was already
    /// sent or does not exist; the transition happens at most once even under
    /// concurrent callers.
    async fn mark_sent(&mut self, id: i64) -> Result<bool>;
    /// Soft-deletes a reminder on user request. Sent rows cannot be cancelled.
    async fn cancel_notification(&mut self, id: i64) -> Result<bool>;
    /// Rewrites `scheduled_at`; used by the timezone repair pass.
    async fn fix_timezone(&mut self, id: i64, corrected: &DateTime<FixedOffset>) -> Result<bool>;
    /// The full unsent set, for diagnostics and the timezone repair pass.
    async fn active_notifications(&mut self) -> Result<Vec<Notification>>;
}

#[async_trait::async_trait]
pub trait ConnectionManager {
    type Connection;
    async fn open(&self) -> Result<Self::Connection>;
    async fn is_valid(&self, c: &mut Self::Connection) -> bool;
}

pub struct ConnectionPool<M: ConnectionManager> {
    connections: Arc<Mutex<Vec<M::Connection>>>,
    permits: Arc<Semaphore>,
    manager: M,
}

pub struct ManagedConnection<T> {
    conn: Option<T>,
    connections: Arc<Mutex<Vec<T>>>,
    #[allow(unused)]
    permit: OwnedSemaphorePermit,
}

impl<T> std::ops::Deref for ManagedConnection<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().unwrap()
    }
}
impl<T> std::ops::DerefMut for ManagedConnection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap()
    }
}

impl<T> Drop for ManagedConnection<T> {
    fn drop(&mut self) {
        let conn = self.conn.take().unwrap();
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conn);
    }
}

impl<T, M> ConnectionPool<M>
where
    T: Send,
    M: ConnectionManager<Connection = T>,
{
    fn new(manager: M) -> Self {
        ConnectionPool {
            connections: Arc::new(Mutex::new(Vec::with_capacity(16))),
            permits: Arc::new(Semaphore::new(16)),
            manager,
        }
    }

    async fn get(&self) -> Result<ManagedConnection<T>> {
        let permit = self.permits.clone().acquire_owned().await.unwrap();
        let conn = {
            let mut slots = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            slots.pop()
        };
        if let Some(mut c) = conn {
            if self.manager.is_valid(&mut c).await {
                return Ok(ManagedConnection {
                    conn: Some(c),
                    permit,
                    connections: self.connections.clone(),
                });
            }
        }

        let conn = self.manager.open().await?;
        Ok(ManagedConnection {
            conn: Some(conn),
            connections: self.connections.clone(),
            permit,
        })
    }
}

pub struct Pool {
    postgres: ConnectionPool<postgres::Postgres>,
}

impl Pool {
    pub fn open(database_url: &str, table_prefix: &str) -> Pool {
        Pool {
            postgres: ConnectionPool::new(postgres::Postgres::new(
                database_url.to_string(),
                table_prefix,
            )),
        }
    }

    /// Draws a connection, retrying a few times if the backend cannot be
    /// reached. After the last attempt the error is returned to the caller
    /// rather than raised further; the next cycle simply tries again.
    pub async fn connection(&self) -> Result<Box<dyn Connection>> {
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.postgres.get().await {
                Ok(conn) => return Ok(Box::new(conn)),
                Err(e) => {
                    tracing::warn!("store connection attempt {attempt} failed: {e:#}");
                    last_err = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.unwrap()).context("store unavailable")
    }
}
