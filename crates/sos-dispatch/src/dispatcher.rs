//! Sequential emergency message dispatcher

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sos_common::{
    compose_message, DispatchOutcome, DispatchProgress, DispatchRequest, FailureReason, LocationFix,
    Recipient, RecipientOutcome, RecipientResult, RunState, DEFAULT_MAPS_BASE_URL,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capability::MessagingCapability;
use crate::error::DispatchError;
use crate::location::LocationProvider;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Pause before every recipient after the first, to stay under carrier throttling
    pub inter_message_delay: Duration,
    /// Upper bound on the location lookup made before the first send
    pub location_timeout: Duration,
    pub maps_base_url: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            inter_message_delay: Duration::from_millis(2000),
            location_timeout: Duration::from_millis(5000),
            maps_base_url: DEFAULT_MAPS_BASE_URL.to_string(),
        }
    }
}

/// Marks the dispatcher busy for the lifetime of one run.
///
/// Dropping the guard without completing it (precondition failure, or the
/// run's future being dropped) puts back whatever state it replaced, so an
/// earlier run's outcome survives a rejected attempt.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
    previous: Option<RunState>,
}

impl<'a> RunGuard<'a> {
    fn acquire(state: &'a Mutex<RunState>, total: usize) -> Result<Self, DispatchError> {
        let mut current = state.lock();
        if current.is_running() {
            return Err(DispatchError::AlreadyRunning);
        }
        let previous = std::mem::replace(&mut *current, RunState::Running(DispatchProgress::new(total)));
        metrics::gauge!("sos.dispatch.in_progress").set(1.0);
        Ok(Self {
            state,
            previous: Some(previous),
        })
    }

    fn progress(&self, progress: DispatchProgress) {
        *self.state.lock() = RunState::Running(progress);
    }

    fn complete(mut self, outcome: DispatchOutcome) {
        *self.state.lock() = RunState::Completed(outcome);
        self.previous = None;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.state.lock() = previous;
        }
        metrics::gauge!("sos.dispatch.in_progress").set(0.0);
    }
}

/// Sends one message to a list of recipients, one at a time.
pub struct Dispatcher {
    config: DispatcherConfig,
    messaging: Arc<dyn MessagingCapability>,
    location: Arc<dyn LocationProvider>,
    state: Mutex<RunState>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        messaging: Arc<dyn MessagingCapability>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            config,
            messaging,
            location,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Run a dispatch to completion.
    ///
    /// `on_progress` is called once per attempted recipient, after the attempt.
    pub async fn dispatch<F>(
        &self,
        request: &DispatchRequest,
        on_progress: F,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        F: FnMut(DispatchProgress) + Send,
    {
        self.dispatch_with_cancel(request, &CancellationToken::new(), on_progress)
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but stops between recipients once
    /// `cancel` fires. A send already in flight is never interrupted.
    pub async fn dispatch_with_cancel<F>(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        F: FnMut(DispatchProgress) + Send,
    {
        let Some(guard) = self.begin(request).await? else {
            return Ok(DispatchOutcome::empty());
        };

        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sos_dispatch",
            run_id = %run_id,
            recipients = request.recipients.len()
        );

        let outcome = self
            .run_sequential(run_id, request, cancel, &guard, &mut on_progress)
            .instrument(span)
            .await;

        guard.complete(outcome.clone());
        Ok(outcome)
    }

    /// Send the message to every recipient in a single capability call.
    pub async fn broadcast(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let Some(guard) = self.begin(request).await? else {
            return Ok(DispatchOutcome::empty());
        };

        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sos_broadcast",
            run_id = %run_id,
            recipients = request.recipients.len()
        );

        let outcome = self.run_broadcast(run_id, request).instrument(span).await;

        guard.complete(outcome.clone());
        Ok(outcome)
    }

    /// Pre-run checks. `None` means there is nothing to send.
    async fn begin(&self, request: &DispatchRequest) -> Result<Option<RunGuard<'_>>, DispatchError> {
        if request.message.trim().is_empty() {
            metrics::counter!("sos.dispatch.runs_rejected_total").increment(1);
            return Err(DispatchError::MessageEmpty);
        }

        if request.recipients.is_empty() {
            warn!("No recipients, nothing to dispatch");
            return Ok(None);
        }

        let guard = match RunGuard::acquire(&self.state, request.recipients.len()) {
            Ok(guard) => guard,
            Err(e) => {
                metrics::counter!("sos.dispatch.runs_rejected_total").increment(1);
                return Err(e);
            }
        };

        if !self.messaging.is_available().await {
            warn!("Messaging capability unavailable, run aborted");
            metrics::counter!("sos.dispatch.runs_rejected_total").increment(1);
            return Err(DispatchError::CapabilityUnavailable);
        }

        metrics::counter!("sos.dispatch.runs_total").increment(1);
        Ok(Some(guard))
    }

    async fn run_sequential<F>(
        &self,
        run_id: Uuid,
        request: &DispatchRequest,
        cancel: &CancellationToken,
        guard: &RunGuard<'_>,
        on_progress: &mut F,
    ) -> DispatchOutcome
    where
        F: FnMut(DispatchProgress) + Send,
    {
        let total = request.recipients.len();
        let fix = self.resolve_location(request.location).await;
        let body = compose_message(&request.message, fix.as_ref(), &self.config.maps_base_url);

        let mut outcome = DispatchOutcome::begin(run_id, total);
        outcome.location_attached = fix.is_some();

        info!(location_attached = outcome.location_attached, "Dispatch run started");

        for (index, recipient) in request.recipients.iter().enumerate() {
            if index > 0 && !self.config.inter_message_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.inter_message_delay) => {}
                }
            }

            if cancel.is_cancelled() {
                let remaining = &request.recipients[index..];
                warn!(skipped = remaining.len(), "Dispatch cancelled");
                for skipped in remaining {
                    outcome.record(RecipientResult::new(skipped, RecipientOutcome::Skipped));
                }
                outcome.cancelled = true;
                metrics::counter!("sos.dispatch.runs_cancelled_total").increment(1);
                break;
            }

            let result = self.send_one(recipient, &body).await;
            outcome.record(result);

            let progress = DispatchProgress {
                sent_so_far: outcome.attempted(),
                total,
            };
            guard.progress(progress);
            on_progress(progress);
        }

        outcome.finish();
        info!(
            success = outcome.success_count,
            failed = outcome.failure_count,
            skipped = outcome.skipped_count,
            total = outcome.total_count,
            "Dispatch run completed"
        );
        outcome
    }

    async fn run_broadcast(&self, run_id: Uuid, request: &DispatchRequest) -> DispatchOutcome {
        let fix = self.resolve_location(request.location).await;
        let body = compose_message(&request.message, fix.as_ref(), &self.config.maps_base_url);
        let numbers: Vec<String> = request.recipients.iter().map(|r| r.phone.clone()).collect();

        let mut outcome = DispatchOutcome::begin(run_id, request.recipients.len());
        outcome.location_attached = fix.is_some();

        let recipient_outcome = match self.messaging.send(&numbers, &body).await {
            Ok(status) if status.is_sent() => RecipientOutcome::Sent,
            Ok(status) => {
                warn!(status = %status, "Broadcast not confirmed as sent");
                RecipientOutcome::Failed(FailureReason::Status(status))
            }
            Err(e) => {
                error!(error = %e, "Broadcast failed");
                RecipientOutcome::Failed(FailureReason::Error(e.to_string()))
            }
        };

        let counter = if recipient_outcome == RecipientOutcome::Sent {
            "sos.dispatch.messages_sent_total"
        } else {
            "sos.dispatch.messages_failed_total"
        };
        metrics::counter!(counter).increment(numbers.len() as u64);

        for recipient in &request.recipients {
            outcome.record(RecipientResult::new(recipient, recipient_outcome.clone()));
        }
        outcome.finish();

        info!(
            success = outcome.success_count,
            failed = outcome.failure_count,
            "Broadcast completed"
        );
        outcome
    }

    async fn send_one(&self, recipient: &Recipient, body: &str) -> RecipientResult {
        let numbers = [recipient.phone.clone()];

        let outcome = match self.messaging.send(&numbers, body).await {
            Ok(status) if status.is_sent() => {
                debug!(recipient = %recipient.name, phone = %recipient.masked_phone(), "SMS sent");
                metrics::counter!("sos.dispatch.messages_sent_total").increment(1);
                RecipientOutcome::Sent
            }
            Ok(status) => {
                warn!(
                    recipient = %recipient.name,
                    phone = %recipient.masked_phone(),
                    status = %status,
                    "SMS failed with non-sent result"
                );
                metrics::counter!("sos.dispatch.messages_failed_total").increment(1);
                RecipientOutcome::Failed(FailureReason::Status(status))
            }
            Err(e) => {
                error!(
                    recipient = %recipient.name,
                    phone = %recipient.masked_phone(),
                    error = %e,
                    "Error sending SMS"
                );
                metrics::counter!("sos.dispatch.messages_failed_total").increment(1);
                RecipientOutcome::Failed(FailureReason::Error(e.to_string()))
            }
        };

        RecipientResult::new(recipient, outcome)
    }

    /// A valid fix from the request wins; otherwise ask the provider. Any
    /// failure means no location.
    async fn resolve_location(&self, supplied: Option<LocationFix>) -> Option<LocationFix> {
        if let Some(fix) = supplied {
            if fix.is_valid() {
                return Some(fix);
            }
            warn!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                "Ignoring out-of-range location fix"
            );
        }

        let timeout = self.config.location_timeout;
        match tokio::time::timeout(timeout, self.location.current_fix(timeout)).await {
            Ok(Ok(fix)) if fix.is_valid() => Some(fix),
            Ok(Ok(fix)) => {
                warn!(
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    "Provider returned out-of-range fix, sending without location"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Could not get current location, sending without location");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Location lookup timed out, sending without location"
                );
                None
            }
        }
    }
}
