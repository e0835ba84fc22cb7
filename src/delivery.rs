//! Sending messages through the Telegram Bot API.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

// Bot API error descriptions that mean the recipient cannot receive messages
// at all, as opposed to a transient failure worth retrying next cycle.
static UNREACHABLE_MARKERS: &[&str] = &[
    "bot was blocked by the user",
    "user is deactivated",
    "chat not found",
];

/// Failure sending to the chat channel. The scheduler never retries within a
/// cycle; an unsent row simply becomes due again on the next minute boundary.
#[derive(Debug)]
pub enum DeliveryError {
    /// The recipient cannot receive messages at all: they blocked the bot,
    /// deleted their account, or the chat no longer exists.
    Unreachable(String),
    /// The Bot API rejected the request.
    Api { status: u16, description: String },
    /// The request never reached the API or the response never arrived.
    Transport(anyhow::Error),
    /// The dispatch timeout elapsed.
    Timeout,
}

impl std::error::Error for DeliveryError {}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeliveryError::Unreachable(reason) => write!(f, "recipient unreachable: {reason}"),
            DeliveryError::Api {
                status,
                description,
            } => write!(f, "chat API error (status {status}): {description}"),
            DeliveryError::Transport(e) => write!(f, "transport failure: {e:#}"),
            DeliveryError::Timeout => f.write_str("delivery timed out"),
        }
    }
}

/// The outbound messaging capability. One attempt per call; retry and backoff
/// are the caller's concern.
#[async_trait::async_trait]
pub trait Sender: Send + Sync {
    async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), DeliveryError>;

    /// Whether this sender has everything it needs to reach the network. The
    /// bridge refuses to install senders that do not.
    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    token: SecretString,
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<BotProfile>,
}

#[derive(Debug, serde::Deserialize)]
struct BotProfile {
    username: Option<String>,
}

impl TelegramClient {
    pub fn new(token: SecretString, api_url: String) -> Self {
        TelegramClient {
            token,
            client: reqwest::Client::new(),
            api_url,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_url,
            self.token.expose_secret()
        )
    }

    /// Calls `getMe`, verifying the token against the live API. Returns the
    /// bot's username.
    pub async fn validate(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("requesting getMe: {e}"))?;
        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("decoding getMe response: {e}"))?;
        if !body.ok {
            anyhow::bail!(
                "getMe rejected (status {status}): {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(body
            .result
            .and_then(|me| me.username)
            .unwrap_or_else(|| "<unnamed bot>".to_string()))
    }
}

#[async_trait::async_trait]
impl Sender for TelegramClient {
    async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({ "chat_id": recipient_id, "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.into())
                }
            })?;

        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(e.into()))?;
        if body.ok {
            return Ok(());
        }

        let description = body
            .description
            .unwrap_or_else(|| "no error description".to_string());
        if status.as_u16() == 403
            || UNREACHABLE_MARKERS
                .iter()
                .any(|marker| description.contains(marker))
        {
            return Err(DeliveryError::Unreachable(description));
        }
        Err(DeliveryError::Api {
            status: status.as_u16(),
            description,
        })
    }

    fn is_configured(&self) -> bool {
        !self.token.expose_secret().is_empty()
    }
}
