//! HTTP SMS gateway
//!
//! - JSON POST of `{"to": [...], "body": "...", "from": "..."}` to the gateway URL
//! - Optional bearer token
//! - Status classification from the response body
//! - Optional health probe used by `is_available`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sos_common::{mask_phone, SendStatus};
use tracing::{debug, info, warn};

use crate::capability::MessagingCapability;
use crate::error::SendError;

/// Longest slice of a rejected response body kept in the error.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    to: &'a [String],
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
struct SmsResponse {
    status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSmsGatewayConfig {
    pub url: String,
    pub health_url: Option<String>,
    pub auth_token: Option<String>,
    pub sender_id: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSmsGatewayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            health_url: None,
            auth_token: None,
            sender_id: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpSmsGatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Resolve `path` against the send URL. Absolute URLs are used as-is;
    /// an empty path clears the probe.
    pub fn with_health_path(mut self, path: &str) -> Self {
        let path = path.trim();
        self.health_url = if path.is_empty() {
            None
        } else {
            match Url::parse(&self.url).and_then(|base| base.join(path)) {
                Ok(url) => Some(url.to_string()),
                Err(e) => {
                    warn!(error = %e, path = %path, "Could not resolve gateway health path");
                    None
                }
            }
        };
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        let sender_id = sender_id.into();
        self.sender_id = if sender_id.is_empty() { None } else { Some(sender_id) };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Messaging capability backed by an HTTP SMS gateway.
pub struct HttpSmsGateway {
    client: Client,
    config: HttpSmsGatewayConfig,
}

impl HttpSmsGateway {
    pub fn new(config: HttpSmsGatewayConfig) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(
            timeout_secs = config.timeout.as_secs(),
            health_probe = config.health_url.is_some(),
            "HttpSmsGateway initialized"
        );

        Ok(Self { client, config })
    }

    fn classify_body(body: &str) -> SendStatus {
        match serde_json::from_str::<SmsResponse>(body) {
            Ok(SmsResponse { status: Some(status) }) => SendStatus::from(status.as_str()),
            // Accepted without a status field
            _ => SendStatus::Sent,
        }
    }
}

#[async_trait]
impl MessagingCapability for HttpSmsGateway {
    async fn is_available(&self) -> bool {
        if self.config.url.trim().is_empty() || Url::parse(&self.config.url).is_err() {
            warn!("SMS gateway URL is missing or invalid");
            return false;
        }

        let Some(health_url) = &self.config.health_url else {
            return true;
        };

        match self.client.get(health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status_code = response.status().as_u16(), "SMS gateway health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "SMS gateway health check unreachable");
                false
            }
        }
    }

    async fn send(&self, phone_numbers: &[String], body: &str) -> Result<SendStatus, SendError> {
        if self.config.url.trim().is_empty() {
            return Err(SendError::Unavailable("no gateway URL configured".to_string()));
        }

        let payload = SmsPayload {
            to: phone_numbers,
            body,
            from: self.config.sender_id.as_deref(),
        };

        let mut request = self
            .client
            .post(&self.config.url)
            .header("Accept", "application/json")
            .json(&payload);

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    error = %e,
                    status_code = status.as_u16(),
                    "Failed to read gateway response body"
                );
                String::new()
            }
        };

        if status.is_success() {
            let send_status = Self::classify_body(&text);
            debug!(
                to = ?phone_numbers.iter().map(|p| mask_phone(p)).collect::<Vec<_>>(),
                status_code = status.as_u16(),
                send_status = %send_status,
                "Gateway accepted message"
            );
            Ok(send_status)
        } else {
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
