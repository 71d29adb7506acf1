use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod logging;

/// Base URL used for the map link appended to outgoing messages.
pub const DEFAULT_MAPS_BASE_URL: &str = "https://www.google.com/maps";

/// Label placed in front of the map link.
pub const LOCATION_LABEL: &str = "My current location:";

// ============================================================================
// Recipients and Location
// ============================================================================

/// An emergency contact. The phone number is carried as entered; no format
/// validation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub phone: String,
}

impl Recipient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: phone.into(),
        }
    }

    /// Phone number with everything but the last four characters replaced,
    /// for use in log fields.
    pub fn masked_phone(&self) -> String {
        mask_phone(&self.phone)
    }
}

pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

/// A single coordinate sample in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and within [-90, 90] / [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Map link for this fix, e.g. `https://www.google.com/maps?q=40.7128,-74.006`.
    pub fn maps_url(&self, base_url: &str) -> String {
        format!(
            "{}?q={},{}",
            base_url.trim_end_matches('/'),
            self.latitude,
            self.longitude
        )
    }
}

/// Build the text that is actually sent: the trimmed message, followed by a
/// blank line and the map link when a fix is available.
pub fn compose_message(message: &str, fix: Option<&LocationFix>, maps_base_url: &str) -> String {
    let body = message.trim();
    match fix {
        Some(fix) => format!("{}\n\n{} {}", body, LOCATION_LABEL, fix.maps_url(maps_base_url)),
        None => body.to_string(),
    }
}

// ============================================================================
// Dispatch Request
// ============================================================================

/// Everything a dispatch run needs from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub message: String,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub location: Option<LocationFix>,
}

impl DispatchRequest {
    pub fn new(message: impl Into<String>, recipients: Vec<Recipient>) -> Self {
        Self {
            message: message.into(),
            recipients,
            location: None,
        }
    }

    pub fn with_location(mut self, fix: LocationFix) -> Self {
        self.location = Some(fix);
        self
    }
}

// ============================================================================
// Send Results
// ============================================================================

/// Result reported by the messaging capability for a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Sent,
    Cancelled,
    Unknown,
}

impl SendStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

impl From<&str> for SendStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sent" => Self::Sent,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Why a recipient was not reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The capability answered with something other than `sent`.
    Status(SendStatus),
    /// The send call itself failed.
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "capability reported status '{}'", status),
            Self::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum RecipientOutcome {
    Sent,
    Failed(FailureReason),
    /// Not attempted because the run was cancelled first.
    Skipped,
}

impl fmt::Display for RecipientOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientResult {
    pub recipient_id: String,
    pub name: String,
    pub outcome: RecipientOutcome,
}

impl RecipientResult {
    pub fn new(recipient: &Recipient, outcome: RecipientOutcome) -> Self {
        Self {
            recipient_id: recipient.id.clone(),
            name: recipient.name.clone(),
            outcome,
        }
    }
}

// ============================================================================
// Outcome, Progress and Run State
// ============================================================================

/// Aggregated result of one dispatch run.
///
/// `success_count + failure_count + skipped_count == total_count` holds at
/// all times once every recipient has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub run_id: Uuid,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub total_count: usize,
    pub cancelled: bool,
    pub location_attached: bool,
    pub results: Vec<RecipientResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DispatchOutcome {
    pub fn begin(run_id: Uuid, total_count: usize) -> Self {
        Self {
            run_id,
            success_count: 0,
            failure_count: 0,
            skipped_count: 0,
            total_count,
            cancelled: false,
            location_attached: false,
            results: Vec::with_capacity(total_count),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Outcome of a run with no recipients.
    pub fn empty() -> Self {
        let mut outcome = Self::begin(Uuid::new_v4(), 0);
        outcome.finish();
        outcome
    }

    pub fn record(&mut self, result: RecipientResult) {
        match result.outcome {
            RecipientOutcome::Sent => self.success_count += 1,
            RecipientOutcome::Failed(_) => self.failure_count += 1,
            RecipientOutcome::Skipped => self.skipped_count += 1,
        }
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Attempts made so far (sent or failed).
    pub fn attempted(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn summary(&self) -> DispatchSummary {
        if self.total_count == 0 {
            DispatchSummary::Empty
        } else if self.success_count == self.total_count {
            DispatchSummary::AllSent { total: self.total_count }
        } else if self.success_count > 0 {
            DispatchSummary::PartialSuccess {
                sent: self.success_count,
                total: self.total_count,
            }
        } else {
            DispatchSummary::NoneSent { total: self.total_count }
        }
    }
}

/// Live progress of a running dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchProgress {
    pub sent_so_far: usize,
    pub total: usize,
}

impl DispatchProgress {
    pub fn new(total: usize) -> Self {
        Self { sent_so_far: 0, total }
    }

    pub fn is_complete(&self) -> bool {
        self.sent_so_far >= self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Running(DispatchProgress),
    Completed(DispatchOutcome),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Idle
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Caller-facing classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchSummary {
    Empty,
    AllSent { total: usize },
    PartialSuccess { sent: usize, total: usize },
    NoneSent { total: usize },
}

impl DispatchSummary {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Empty => "No Contacts",
            Self::AllSent { .. } => "Success",
            Self::PartialSuccess { .. } => "Partial Success",
            Self::NoneSent { .. } => "Error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Empty => "Please add emergency contacts first.".to_string(),
            Self::AllSent { .. } => "Emergency messages have been sent to all contacts. \
                They may take a few minutes to deliver."
                .to_string(),
            Self::PartialSuccess { sent, total } => format!(
                "Sent to {} out of {} contacts. Some messages may take time to deliver.",
                sent, total
            ),
            Self::NoneSent { .. } => {
                "Failed to send messages. Please try again or send messages manually.".to_string()
            }
        }
    }

    pub fn any_sent(&self) -> bool {
        matches!(self, Self::AllSent { .. } | Self::PartialSuccess { .. })
    }
}
