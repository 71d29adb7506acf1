//! Messaging capability seam

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sos_common::{mask_phone, SendStatus};
use tracing::info;

use crate::error::SendError;

/// Platform ability to transmit an SMS to one or more phone numbers.
#[async_trait]
pub trait MessagingCapability: Send + Sync {
    /// Whether messages can be sent at all. Checked once before a run starts.
    async fn is_available(&self) -> bool;

    /// Send `body` to every number in `phone_numbers` as a single message.
    async fn send(&self, phone_numbers: &[String], body: &str) -> Result<SendStatus, SendError>;
}

/// Dry-run capability: logs every message and reports it as sent.
#[derive(Debug, Default)]
pub struct LogMessagingCapability {
    sent: AtomicUsize,
}

impl LogMessagingCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of send calls handled so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingCapability for LogMessagingCapability {
    async fn is_available(&self) -> bool {
        true
    }

    async fn send(&self, phone_numbers: &[String], body: &str) -> Result<SendStatus, SendError> {
        let masked: Vec<String> = phone_numbers.iter().map(|p| mask_phone(p)).collect();
        self.sent.fetch_add(1, Ordering::SeqCst);
        info!(to = ?masked, chars = body.chars().count(), "DRY RUN: SMS not transmitted");
        Ok(SendStatus::Sent)
    }
}
