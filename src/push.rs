use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

const FCM_SEND_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// Error codes the FCM backend reports for tokens that will never work again.
const INVALID_TOKEN_CODES: [&str; 2] = ["NotRegistered", "InvalidRegistration"];

#[derive(Debug, Error)]
pub enum PushError {
    /// The token is permanently dead (device unregistered or token malformed).
    /// The caller is expected to clear it so future runs skip the user.
    #[error("push token no longer valid: {0}")]
    InvalidToken(String),
    /// Transient or unclassified delivery failure. Logged, never retried
    /// within a run.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel for the single daily "watchlist updated" notification.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn send_watchlist_update(&self, token: &str) -> Result<(), PushError>;
}

pub struct FcmClient {
    http: Client,
    endpoint: Url,
    server_key: String,
}

impl fmt::Debug for FcmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FcmClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl FcmClient {
    pub fn new(server_key: String) -> Self {
        let endpoint = Url::parse(FCM_SEND_ENDPOINT).expect("valid default FCM URL");
        Self::with_endpoint(server_key, endpoint)
    }

    pub fn with_endpoint(server_key: String, endpoint: Url) -> Self {
        let http = Client::builder()
            .user_agent("watchlist-notifier/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint,
            server_key,
        }
    }
}

/// Fixed message announcing that the user's watchlist changed. The `data`
/// block tags the message type for client-side routing; android/apns blocks
/// carry the platform delivery hints (sound, priority, badge).
pub fn build_watchlist_update_message(token: &str) -> Value {
    json!({
        "to": token,
        "notification": {
            "title": "Your watchlist has updates!",
            "body": "Check what's available on your streaming services",
        },
        "data": {
            "type": "watchlist_update",
            "click_action": "FLUTTER_NOTIFICATION_CLICK",
        },
        "android": {
            "priority": "high",
            "notification": {
                "sound": "default",
                "priority": "high",
            },
        },
        "apns": {
            "payload": {
                "aps": {
                    "sound": "default",
                    "badge": 1,
                },
            },
        },
    })
}

#[derive(Deserialize, Debug, Default)]
struct SendResponse {
    #[serde(default)]
    results: Vec<SendResult>,
}

#[derive(Deserialize, Debug, Default)]
struct SendResult {
    #[serde(default)]
    error: Option<String>,
}

/// Map the per-token result into our failure taxonomy.
fn classify_response(resp: &SendResponse) -> Result<(), PushError> {
    match resp.results.first().and_then(|r| r.error.as_deref()) {
        None => Ok(()),
        Some(code) if INVALID_TOKEN_CODES.contains(&code) => {
            Err(PushError::InvalidToken(code.to_string()))
        }
        Some(code) => Err(PushError::Delivery(code.to_string())),
    }
}

#[async_trait]
impl PushService for FcmClient {
    async fn send_watchlist_update(&self, token: &str) -> Result<(), PushError> {
        let body = build_watchlist_update_message(token);
        let res = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| PushError::Delivery(err.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PushError::Delivery(format!("fcm error {}: {}", status, body)));
        }

        let payload: SendResponse = res
            .json()
            .await
            .map_err(|err| PushError::Delivery(format!("invalid fcm response: {}", err)))?;
        debug!("push accepted by FCM");
        classify_response(&payload)
    }
}
