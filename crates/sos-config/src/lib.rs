//! SOS Relay Configuration
//!
//! TOML-based configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatch: DispatchSettings,
    pub gateway: GatewaySettings,
    pub message: MessageSettings,
    pub location: LocationSettings,
    pub contacts: Vec<ContactSettings>,
}

/// Dispatch loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Pause before every recipient after the first
    pub inter_message_delay_ms: u64,
    /// Location lookup timeout at send time
    pub location_timeout_ms: u64,
    /// Location lookup timeout when prefetching ahead of a run
    pub location_prefetch_timeout_ms: u64,
    /// Base URL for the appended map link
    pub maps_base_url: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            inter_message_delay_ms: 2000,
            location_timeout_ms: 5000,
            location_prefetch_timeout_ms: 10000,
            maps_base_url: "https://www.google.com/maps".to_string(),
        }
    }
}

impl DispatchSettings {
    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }

    pub fn location_prefetch_timeout(&self) -> Duration {
        Duration::from_millis(self.location_prefetch_timeout_ms)
    }
}

/// SMS gateway selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Gateway kind: http, log
    pub kind: String,
    /// Send endpoint for the http gateway
    pub url: String,
    /// Optional health path probed before a run (relative to url's origin or absolute)
    pub health_path: String,
    /// Bearer token sent with every request
    pub auth_token: String,
    /// Sender id forwarded to the gateway
    pub sender_id: String,
    /// HTTP request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            url: String::new(),
            health_path: String::new(),
            auth_token: String::new(),
            sender_id: String::new(),
            timeout_ms: 30000,
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    pub emergency_message: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            emergency_message: "I need help. This is an emergency, please contact me as soon as possible."
                .to_string(),
        }
    }
}

/// Fixed coordinates, for devices without a location source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationSettings {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSettings {
    pub id: String,
    pub name: String,
    pub phone: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return Err(ConfigError::ValidationError(
                "location.latitude and location.longitude must be set together".to_string(),
            ));
        }

        match self.gateway.kind.as_str() {
            "log" => {}
            "http" => {
                if self.gateway.url.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "gateway.url is required for the http gateway".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown gateway kind '{}' (expected http or log)",
                    other
                )));
            }
        }

        let mut seen = HashSet::new();
        for contact in &self.contacts {
            if contact.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "contact '{}' has no id",
                    contact.name
                )));
            }
            if !seen.insert(contact.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate contact id '{}'",
                    contact.id
                )));
            }
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# SOS Relay Configuration
# Environment variables (SOS_*) override these settings

[dispatch]
inter_message_delay_ms = 2000
location_timeout_ms = 5000
location_prefetch_timeout_ms = 10000
maps_base_url = "https://www.google.com/maps"

[gateway]
kind = "http"  # http or log
url = "https://sms-gateway.example.com/v1/messages"
health_path = ""
auth_token = ""
sender_id = ""
timeout_ms = 30000

[message]
emergency_message = "I need help. This is an emergency, please contact me as soon as possible."

# Optional fixed coordinates
[location]
# latitude = 40.7128
# longitude = -74.0060

[[contacts]]
id = "1"
name = "Alice"
phone = "+15550000001"

[[contacts]]
id = "2"
name = "Bob"
phone = "+15550000002"
"#
        .to_string()
    }
}
