//! One-shot repair of `scheduled_at` values stored outside the canonical
//! zone. Pass a recipient id to restrict the pass to that recipient.

use remindbot::config::Config;
use remindbot::db::Pool;
use remindbot::{logger, timezone};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let config = Config::from_env()?;
    let recipient = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<i64>())
        .transpose()?;

    let pool = Pool::open(&config.database_url, &config.table_prefix);
    let mut conn = pool.connection().await?;
    let repaired =
        timezone::normalize_scheduled_times(&mut *conn, config.canonical_zone, recipient).await?;
    println!("repaired {repaired} notification(s)");
    Ok(())
}
