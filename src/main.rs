//! The reminder processor: the standalone executable that owns the delivery
//! loop. The conversational bot runs elsewhere and only shares the database;
//! this process polls it and pushes due reminders out through the chat API.

use anyhow::Context as _;
use remindbot::bridge::SenderSlot;
use remindbot::config::Config;
use remindbot::db::Pool;
use remindbot::delivery::TelegramClient;
use remindbot::liveness::LivenessMarker;
use remindbot::{Context, logger, scheduler};
use std::sync::Arc;
use std::time::Duration;

// The chat API is occasionally slow to accept a fresh session; keep probing
// for a while before declaring the credentials dead.
const CHAT_CONNECT_ATTEMPTS: usize = 30;
const CHAT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let config = Config::from_env().context("invalid configuration")?;
    let _marker = LivenessMarker::create(&config.liveness_marker)?;

    let ctx = Arc::new(Context {
        db: Pool::open(&config.database_url, &config.table_prefix),
        sender: SenderSlot::new(),
        config,
    });

    // Fail now, not one minute from now, if the store cannot come up at all.
    // This first connection also runs any pending migrations.
    ctx.db
        .connection()
        .await
        .context("store initialization failed")?;
    tracing::info!("notification store ready");

    tokio::spawn(connect_chat_client(ctx.clone()));

    scheduler::run(ctx).await
}

/// Builds the chat client and hands it to the scheduler through the sender
/// slot once the API accepts it. Runs concurrently with scheduler startup;
/// the scheduler waits on the slot with its own bounded patience.
async fn connect_chat_client(ctx: Arc<Context>) {
    let client = TelegramClient::new(
        ctx.config.telegram_token.clone(),
        ctx.config.telegram_api_url.clone(),
    );

    for attempt in 1..=CHAT_CONNECT_ATTEMPTS {
        match client.validate().await {
            Ok(username) => {
                tracing::info!("chat client connected as @{username}");
                if !ctx.sender.set(Arc::new(client)) {
                    tracing::error!("sender slot rejected the chat client");
                }
                return;
            }
            Err(e) => {
                tracing::warn!("chat client connection attempt {attempt} failed: {e:#}");
                if attempt < CHAT_CONNECT_ATTEMPTS {
                    tokio::time::sleep(CHAT_CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }
    tracing::error!("giving up on the chat client after {CHAT_CONNECT_ATTEMPTS} attempts");
}
