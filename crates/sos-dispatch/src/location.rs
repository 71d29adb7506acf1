//! Location providers
//!
//! A run asks for a fix once, before the first send. Any failure means the
//! message goes out without a map link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sos_common::LocationFix;
use tracing::{debug, warn};

use crate::error::LocationError;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Obtain a fix, giving up after roughly `timeout`.
    async fn current_fix(&self, timeout: Duration) -> Result<LocationFix, LocationError>;
}

/// Always returns the same coordinates.
#[derive(Debug, Clone, Copy)]
pub struct StaticLocationProvider {
    fix: LocationFix,
}

impl StaticLocationProvider {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: LocationFix::new(latitude, longitude),
        }
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn current_fix(&self, _timeout: Duration) -> Result<LocationFix, LocationError> {
        Ok(self.fix)
    }
}

/// For devices with no location source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocationProvider;

#[async_trait]
impl LocationProvider for NoLocationProvider {
    async fn current_fix(&self, _timeout: Duration) -> Result<LocationFix, LocationError> {
        Err(LocationError::Unavailable("no location source configured".to_string()))
    }
}

/// What a caller can show while a run is being prepared.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationStatus {
    Pending,
    Attached(LocationFix),
    Unavailable(String),
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Getting location..."),
            Self::Attached(_) => write!(f, "Location attached"),
            Self::Unavailable(reason) => write!(f, "{}", reason),
        }
    }
}

/// Fetches a fix ahead of time and reuses it at send time.
///
/// `prefetch` is meant to run when the caller first shows the SOS screen,
/// with a generous timeout. If it failed, `current_fix` tries once more with
/// the shorter send-time timeout.
pub struct CachedLocationProvider {
    inner: Arc<dyn LocationProvider>,
    prefetch_timeout: Duration,
    cached: RwLock<Option<LocationFix>>,
    last_error: RwLock<Option<LocationError>>,
}

impl CachedLocationProvider {
    pub fn new(inner: Arc<dyn LocationProvider>, prefetch_timeout: Duration) -> Self {
        Self {
            inner,
            prefetch_timeout,
            cached: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub async fn prefetch(&self) -> Result<LocationFix, LocationError> {
        let timeout = self.prefetch_timeout;
        let result = match tokio::time::timeout(timeout, self.inner.current_fix(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout(timeout)),
        };
        self.store(&result);
        result
    }

    pub fn cached(&self) -> Option<LocationFix> {
        *self.cached.read()
    }

    pub fn status(&self) -> LocationStatus {
        if let Some(fix) = *self.cached.read() {
            return LocationStatus::Attached(fix);
        }
        match &*self.last_error.read() {
            Some(LocationError::PermissionDenied) => {
                LocationStatus::Unavailable("Permission to access location was denied".to_string())
            }
            Some(_) => LocationStatus::Unavailable("Error getting location".to_string()),
            None => LocationStatus::Pending,
        }
    }

    fn store(&self, result: &Result<LocationFix, LocationError>) {
        match result {
            Ok(fix) => {
                debug!(latitude = fix.latitude, longitude = fix.longitude, "Location fix cached");
                *self.cached.write() = Some(*fix);
                *self.last_error.write() = None;
            }
            Err(e) => {
                warn!(error = %e, "Location lookup failed");
                *self.last_error.write() = Some(e.clone());
            }
        }
    }
}

#[async_trait]
impl LocationProvider for CachedLocationProvider {
    async fn current_fix(&self, timeout: Duration) -> Result<LocationFix, LocationError> {
        if let Some(fix) = self.cached() {
            return Ok(fix);
        }
        let result = self.inner.current_fix(timeout).await;
        self.store(&result);
        result
    }
}
