use super::notifications::{Notification, ScheduledTime};
use super::recipients::Recipient;
use crate::db::{Connection, ConnectionManager, ManagedConnection};
use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset, Utc};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tracing::trace;

// Fail fast instead of letting a hung backend stall the delivery cadence.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Postgres {
    url: String,
    tables: Tables,
    init: std::sync::Once,
}

impl Postgres {
    pub fn new(url: String, table_prefix: &str) -> Self {
        Postgres {
            url,
            tables: Tables::new(table_prefix),
            init: std::sync::Once::new(),
        }
    }
}

/// Table names with the configured prefix already applied. All logical
/// tables share the prefix.
#[derive(Clone)]
pub struct Tables {
    prefix: String,
    pub notifications: String,
    pub recipients: String,
    pub versions: String,
}

impl Tables {
    fn new(prefix: &str) -> Tables {
        Tables {
            prefix: prefix.to_string(),
            notifications: format!("{prefix}notifications"),
            recipients: format!("{prefix}recipients"),
            versions: format!("{prefix}database_versions"),
        }
    }
}

pub async fn make_client(db_url: &str) -> Result<tokio_postgres::Client> {
    let mut config: tokio_postgres::Config =
        db_url.parse().context("parsing database connection string")?;
    config.connect_timeout(CONNECT_TIMEOUT);

    if db_url.contains("sslmode=require") {
        let connector = TlsConnector::builder()
            .build()
            .context("building TlsConnector")?;
        let connector = MakeTlsConnector::new(connector);
        let (db_client, connection) = config
            .connect(connector)
            .await
            .context("failed to connect to the database over TLS")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("database connection error: {e}");
            }
        });
        Ok(db_client)
    } else {
        let (db_client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .context("failed to connect to the database")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("database connection error: {e}");
            }
        });
        Ok(db_client)
    }
}

// `{p}` is replaced with the configured table prefix when the migration runs.
//
// `scheduled_at` is text: rows imported from the legacy store may carry a
// zoneless wall-clock string, and the column has to be able to hold them
// until the timezone repair pass rewrites them as RFC 3339.
static MIGRATIONS: &[&str] = &[
    "
CREATE TABLE {p}recipients (
    recipient_id BIGINT PRIMARY KEY,
    username TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    unreachable_count INTEGER NOT NULL DEFAULT 0
);
",
    "
CREATE TABLE {p}notifications (
    notification_id BIGSERIAL PRIMARY KEY,
    recipient_id BIGINT NOT NULL,
    text TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now(),
    is_sent BOOLEAN NOT NULL DEFAULT FALSE,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE
);
",
    "
CREATE INDEX {p}notifications_unsent_index
    ON {p}notifications (recipient_id)
    WHERE is_sent = FALSE AND is_deleted = FALSE;
",
];

#[async_trait::async_trait]
impl ConnectionManager for Postgres {
    type Connection = PostgresConnection;
    async fn open(&self) -> Result<Self::Connection> {
        let client = make_client(&self.url).await?;
        let mut should_init = false;
        self.init.call_once(|| {
            should_init = true;
        });
        if should_init {
            run_migrations(&client, &self.tables).await?;
        }
        Ok(PostgresConnection {
            conn: client,
            tables: self.tables.clone(),
        })
    }
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        !conn.conn.is_closed()
    }
}

pub async fn run_migrations(client: &tokio_postgres::Client, tables: &Tables) -> Result<()> {
    let versions = &tables.versions;
    client
        .execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {versions} (
                    zero INTEGER PRIMARY KEY,
                    migration_counter INTEGER
                );"
            ),
            &[],
        )
        .await
        .context("creating database versioning table")?;

    client
        .execute(
            &format!(
                "INSERT INTO {versions} (zero, migration_counter)
                    VALUES (0, 0)
                    ON CONFLICT DO NOTHING"
            ),
            &[],
        )
        .await
        .context("inserting initial database_versions")?;

    let migration_idx: i32 = client
        .query_one(&format!("SELECT migration_counter FROM {versions}"), &[])
        .await
        .context("getting migration counter")?
        .get(0);
    let migration_idx = migration_idx as usize;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        if idx >= migration_idx {
            let sql = migration.replace("{p}", &tables.prefix);
            client
                .execute(sql.as_str(), &[])
                .await
                .with_context(|| format!("executing {idx}th migration"))?;
            client
                .execute(
                    &format!("UPDATE {versions} SET migration_counter = $1"),
                    &[&(idx as i32 + 1)],
                )
                .await
                .with_context(|| format!("updating migration counter to {idx}"))?;
        }
    }

    Ok(())
}

pub struct PostgresConnection {
    conn: tokio_postgres::Client,
    tables: Tables,
}

impl PostgresConnection {
    fn client(&self) -> &tokio_postgres::Client {
        &self.conn
    }
    fn tables(&self) -> &Tables {
        &self.tables
    }
}

static NOTIFICATION_COLUMNS: &str =
    "notification_id, recipient_id, text, scheduled_at, created_at, is_sent, is_deleted";

#[async_trait::async_trait]
impl Connection for ManagedConnection<PostgresConnection> {
    async fn record_recipient(&mut self, recipient_id: i64, username: &str) -> Result<()> {
        trace!("record_recipient(recipient_id={recipient_id})");
        let recipients = &self.tables().recipients;
        self.client()
            .execute(
                &format!(
                    "INSERT INTO {recipients} (recipient_id, username) VALUES ($1, $2)
                    ON CONFLICT (recipient_id)
                    DO UPDATE SET username = EXCLUDED.username, is_active = TRUE"
                ),
                &[&recipient_id, &username],
            )
            .await
            .context("inserting recipient")?;
        Ok(())
    }

    async fn get_recipient(&mut self, recipient_id: i64) -> Result<Option<Recipient>> {
        let recipients = &self.tables().recipients;
        let row = self
            .client()
            .query_opt(
                &format!(
                    "SELECT recipient_id, username, is_active, unreachable_count
                    FROM {recipients} WHERE recipient_id = $1"
                ),
                &[&recipient_id],
            )
            .await
            .context("selecting recipient")?;
        Ok(row.map(|row| Recipient {
            recipient_id: row.get(0),
            username: row.get(1),
            is_active: row.get(2),
            unreachable_count: row.get(3),
        }))
    }

    async fn deactivate_recipient(&mut self, recipient_id: i64) -> Result<()> {
        trace!("deactivate_recipient(recipient_id={recipient_id})");
        let recipients = &self.tables().recipients;
        self.client()
            .execute(
                &format!("UPDATE {recipients} SET is_active = FALSE WHERE recipient_id = $1"),
                &[&recipient_id],
            )
            .await
            .context("deactivating recipient")?;
        Ok(())
    }

    async fn record_unreachable(&mut self, recipient_id: i64) -> Result<i32> {
        trace!("record_unreachable(recipient_id={recipient_id})");
        let recipients = &self.tables().recipients;
        let row = self
            .client()
            .query_one(
                &format!(
                    "INSERT INTO {recipients} (recipient_id, username, unreachable_count)
                    VALUES ($1, '', 1)
                    ON CONFLICT (recipient_id)
                    DO UPDATE SET unreachable_count = {recipients}.unreachable_count + 1
                    RETURNING unreachable_count"
                ),
                &[&recipient_id],
            )
            .await
            .context("recording unreachable delivery")?;
        Ok(row.get(0))
    }

    async fn clear_unreachable(&mut self, recipient_id: i64) -> Result<()> {
        let recipients = &self.tables().recipients;
        self.client()
            .execute(
                &format!(
                    "UPDATE {recipients} SET unreachable_count = 0
                    WHERE recipient_id = $1 AND unreachable_count <> 0"
                ),
                &[&recipient_id],
            )
            .await
            .context("clearing unreachable count")?;
        Ok(())
    }

    async fn create_notification(
        &mut self,
        recipient_id: i64,
        text: &str,
        scheduled_at: &DateTime<FixedOffset>,
    ) -> Result<i64> {
        trace!("create_notification(recipient_id={recipient_id})");
        let notifications = &self.tables().notifications;
        let row = self
            .client()
            .query_one(
                &format!(
                    "INSERT INTO {notifications} (recipient_id, text, scheduled_at)
                    VALUES ($1, $2, $3)
                    RETURNING notification_id"
                ),
                &[&recipient_id, &text, &scheduled_at.to_rfc3339()],
            )
            .await
            .context("inserting notification")?;
        Ok(row.get(0))
    }

    async fn notifications_due(&mut self, now: &DateTime<Utc>) -> Result<Vec<Notification>> {
        let notifications = &self.tables().notifications;
        let recipients = &self.tables().recipients;
        // Unknown recipients are kept: the recipients table only filters out
        // rows explicitly deactivated for unreachability.
        let rows = self
            .client()
            .query(
                &format!(
                    "SELECT n.notification_id, n.recipient_id, n.text, n.scheduled_at,
                            n.created_at, n.is_sent, n.is_deleted
                    FROM {notifications} n
                    LEFT JOIN {recipients} r ON r.recipient_id = n.recipient_id
                    WHERE n.is_sent = FALSE AND n.is_deleted = FALSE
                        AND COALESCE(r.is_active, TRUE)"
                ),
                &[],
            )
            .await
            .context("querying due notifications")?;

        // The schedule column can hold legacy zoneless text, so the time
        // comparison and the ordering happen here, after parsing.
        let mut due = Vec::new();
        for row in rows {
            let notification = notification_from_row(&row)?;
            match notification.scheduled_at.instant() {
                Some(at) if at <= *now => due.push((at, notification)),
                Some(_) => {}
                None => tracing::warn!(
                    "notification {} has unparseable scheduled_at {:?}, skipping",
                    notification.id,
                    notification.scheduled_at.to_stored()
                ),
            }
        }
        due.sort_by_key(|(at, n)| (*at, n.id));
        Ok(due.into_iter().map(|(_, n)| n).collect())
    }

    async fn notifications_for_recipient(
        &mut self,
        recipient_id: i64,
        include_sent: bool,
    ) -> Result<Vec<Notification>> {
        let notifications = &self.tables().notifications;
        let rows = self
            .client()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM {notifications}
                    WHERE recipient_id = $1 AND is_deleted = FALSE
                        AND (is_sent = FALSE OR $2)
                    ORDER BY notification_id ASC"
                ),
                &[&recipient_id, &include_sent],
            )
            .await
            .context("querying recipient notifications")?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            data.push(notification_from_row(&row)?);
        }
        data.sort_by_key(|n| (n.scheduled_at.instant(), n.id));
        Ok(data)
    }

    async fn mark_sent(&mut self, id: i64) -> Result<bool> {
        trace!("mark_sent(id={id})");
        let notifications = &self.tables().notifications;
        let updated = self
            .client()
            .execute(
                &format!(
                    "UPDATE {notifications} SET is_sent = TRUE
                    WHERE notification_id = $1 AND is_sent = FALSE"
                ),
                &[&id],
            )
            .await
            .context("marking notification sent")?;
        Ok(updated == 1)
    }

    async fn cancel_notification(&mut self, id: i64) -> Result<bool> {
        trace!("cancel_notification(id={id})");
        let notifications = &self.tables().notifications;
        let updated = self
            .client()
            .execute(
                &format!(
                    "UPDATE {notifications} SET is_deleted = TRUE
                    WHERE notification_id = $1 AND is_sent = FALSE AND is_deleted = FALSE"
                ),
                &[&id],
            )
            .await
            .context("cancelling notification")?;
        Ok(updated == 1)
    }

    async fn fix_timezone(&mut self, id: i64, corrected: &DateTime<FixedOffset>) -> Result<bool> {
        trace!("fix_timezone(id={id})");
        let notifications = &self.tables().notifications;
        let updated = self
            .client()
            .execute(
                &format!("UPDATE {notifications} SET scheduled_at = $2 WHERE notification_id = $1"),
                &[&id, &corrected.to_rfc3339()],
            )
            .await
            .context("rewriting scheduled_at")?;
        Ok(updated == 1)
    }

    async fn active_notifications(&mut self) -> Result<Vec<Notification>> {
        let notifications = &self.tables().notifications;
        let rows = self
            .client()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM {notifications}
                    WHERE is_sent = FALSE AND is_deleted = FALSE
                    ORDER BY notification_id ASC"
                ),
                &[],
            )
            .await
            .context("querying active notifications")?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            data.push(notification_from_row(&row)?);
        }
        Ok(data)
    }
}

fn notification_from_row(row: &tokio_postgres::row::Row) -> Result<Notification> {
    let id: i64 = row.try_get(0)?;
    let recipient_id: i64 = row.try_get(1)?;
    let text: String = row.try_get(2)?;
    let scheduled_at: String = row.try_get(3)?;
    let created_at: DateTime<FixedOffset> = row.try_get(4)?;
    let is_sent: bool = row.try_get(5)?;
    let is_deleted: bool = row.try_get(6)?;

    Ok(Notification {
        id,
        recipient_id,
        text,
        scheduled_at: ScheduledTime::parse(&scheduled_at),
        created_at,
        is_sent,
        is_deleted,
    })
}
