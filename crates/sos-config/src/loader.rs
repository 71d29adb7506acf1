//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "sos.toml",
    "config.toml",
    "./config/sos.toml",
    "/etc/sos-relay/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file()? {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                AppConfig::default()
            }
        };

        apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    fn find_config_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        // An explicit path that does not exist is an error, not a fallback
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ReadError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        if let Ok(path) = env::var("SOS_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(?path, "SOS_CONFIG points to a missing file, searching standard paths");
        }

        Ok(CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `SOS_*` overrides using `lookup` as the variable source.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Dispatch
    if let Some(val) = lookup("SOS_DISPATCH_DELAY_MS") {
        if let Ok(ms) = val.parse() {
            config.dispatch.inter_message_delay_ms = ms;
        }
    }
    if let Some(val) = lookup("SOS_LOCATION_TIMEOUT_MS") {
        if let Ok(ms) = val.parse() {
            config.dispatch.location_timeout_ms = ms;
        }
    }
    if let Some(val) = lookup("SOS_LOCATION_PREFETCH_TIMEOUT_MS") {
        if let Ok(ms) = val.parse() {
            config.dispatch.location_prefetch_timeout_ms = ms;
        }
    }
    if let Some(val) = lookup("SOS_MAPS_BASE_URL") {
        config.dispatch.maps_base_url = val;
    }

    // Gateway
    if let Some(val) = lookup("SOS_GATEWAY_KIND") {
        config.gateway.kind = val.to_lowercase();
    }
    if let Some(val) = lookup("SOS_GATEWAY_URL") {
        config.gateway.url = val;
    }
    if let Some(val) = lookup("SOS_GATEWAY_HEALTH_PATH") {
        config.gateway.health_path = val;
    }
    if let Some(val) = lookup("SOS_GATEWAY_TOKEN") {
        config.gateway.auth_token = val;
    }
    if let Some(val) = lookup("SOS_GATEWAY_SENDER_ID") {
        config.gateway.sender_id = val;
    }
    if let Some(val) = lookup("SOS_GATEWAY_TIMEOUT_MS") {
        if let Ok(ms) = val.parse() {
            config.gateway.timeout_ms = ms;
        }
    }

    // Message
    if let Some(val) = lookup("SOS_EMERGENCY_MESSAGE") {
        config.message.emergency_message = val;
    }

    // Location
    if let Some(val) = lookup("SOS_LATITUDE") {
        config.location.latitude = val.parse().ok();
    }
    if let Some(val) = lookup("SOS_LONGITUDE") {
        config.location.longitude = val.parse().ok();
    }
}
