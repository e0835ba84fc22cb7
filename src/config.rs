use chrono_tz::Tz;
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;

static DEFAULT_API_URL: &str = "https://api.telegram.org";
static DEFAULT_TABLE_PREFIX: &str = "remindbot_";
static DEFAULT_CANONICAL_TIMEZONE: &str = "Europe/Moscow";
static DEFAULT_LIVENESS_MARKER: &str = "remindbot.alive";

/// Startup configuration problem. Always fatal: the process must not enter
/// the delivery loop without valid credentials and connection parameters.
#[derive(Debug)]
pub struct ConfigurationError(pub String);

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Bot API token.
    pub telegram_token: SecretString,
    /// Base URL of the Bot API. Overridable so tests can point it at a local
    /// stub server.
    pub telegram_api_url: String,
    /// Prefix shared by all logical tables (recipients, notifications).
    pub table_prefix: String,
    /// The single timezone all `scheduled_at` values are normalized to.
    pub canonical_zone: Tz,
    /// Marker file written while the processor runs; the watchdog reads it.
    pub liveness_marker: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigurationError> {
        let canonical_zone = var_or("CANONICAL_TIMEZONE", DEFAULT_CANONICAL_TIMEZONE);
        let canonical_zone = canonical_zone.parse::<Tz>().map_err(|e| {
            ConfigurationError(format!("cannot parse CANONICAL_TIMEZONE {canonical_zone:?}: {e}"))
        })?;

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            telegram_token: require("TELEGRAM_TOKEN")?.into(),
            telegram_api_url: var_or("TELEGRAM_API_URL", DEFAULT_API_URL),
            table_prefix: var_or("TABLE_PREFIX", DEFAULT_TABLE_PREFIX),
            canonical_zone,
            liveness_marker: var_or("LIVENESS_MARKER", DEFAULT_LIVENESS_MARKER).into(),
        })
    }
}

fn require(key: &str) -> Result<String, ConfigurationError> {
    std::env::var(key).map_err(|_| ConfigurationError(format!("`{key}` must be set")))
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
