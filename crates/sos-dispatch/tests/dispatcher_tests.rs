//! Dispatcher Tests
//!
//! Tests for:
//! - Outcome accounting and partial failure
//! - Progress reporting
//! - Message composition with and without location
//! - Inter-message delay (paused tokio clock)
//! - Pre-run rejections and the single-run guard
//! - Cooperative cancellation
//! - Broadcast mode

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use sos_common::{
    DispatchProgress, DispatchRequest, DispatchSummary, FailureReason, LocationFix, Recipient,
    RecipientOutcome, RunState, SendStatus,
};
use sos_dispatch::{
    CancellationToken, DispatchError, Dispatcher, DispatcherConfig, LocationError,
    LocationProvider, MessagingCapability, NoLocationProvider, SendError, StaticLocationProvider,
};

#[derive(Debug, Clone)]
struct SentMessage {
    to: Vec<String>,
    body: String,
    at: Instant,
}

/// Messaging capability that replays scripted results (default: sent) and
/// records every call.
struct ScriptedCapability {
    available: AtomicBool,
    script: Mutex<VecDeque<Result<SendStatus, SendError>>>,
    sent: Mutex<Vec<SentMessage>>,
    availability_checks: AtomicUsize,
}

impl ScriptedCapability {
    fn new(script: Vec<Result<SendStatus, SendError>>) -> Self {
        Self {
            available: AtomicBool::new(true),
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
            availability_checks: AtomicUsize::new(0),
        }
    }

    fn all_sent() -> Self {
        Self::new(Vec::new())
    }

    fn unavailable() -> Self {
        Self {
            available: AtomicBool::new(false),
            ..Self::all_sent()
        }
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingCapability for ScriptedCapability {
    async fn is_available(&self) -> bool {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn send(&self, phone_numbers: &[String], body: &str) -> Result<SendStatus, SendError> {
        self.sent.lock().unwrap().push(SentMessage {
            to: phone_numbers.to_vec(),
            body: body.to_string(),
            at: Instant::now(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SendStatus::Sent))
    }
}

struct HangingLocationProvider;

#[async_trait]
impl LocationProvider for HangingLocationProvider {
    async fn current_fix(&self, _timeout: Duration) -> Result<LocationFix, LocationError> {
        std::future::pending().await
    }
}

fn recipients(n: usize) -> Vec<Recipient> {
    (1..=n)
        .map(|i| Recipient::new(i.to_string(), format!("Contact {}", i), format!("+1555000000{}", i)))
        .collect()
}

fn dispatcher_with(
    capability: Arc<ScriptedCapability>,
    location: Arc<dyn LocationProvider>,
) -> Dispatcher {
    Dispatcher::new(DispatcherConfig::default(), capability, location)
}

fn dispatcher(capability: Arc<ScriptedCapability>) -> Dispatcher {
    dispatcher_with(capability, Arc::new(NoLocationProvider))
}

#[tokio::test(start_paused = true)]
async fn test_counts_cover_every_recipient() {
    let capability = Arc::new(ScriptedCapability::new(vec![
        Ok(SendStatus::Sent),
        Ok(SendStatus::Unknown),
        Err(SendError::Transport("connection reset".to_string())),
        Ok(SendStatus::Sent),
        Ok(SendStatus::Cancelled),
    ]));
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(5));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failure_count, 3);
    assert_eq!(outcome.total_count, 5);
    assert_eq!(outcome.success_count + outcome.failure_count, request.recipients.len());
    assert!(!outcome.cancelled);
    assert_eq!(capability.sent().len(), 5);
}

#[tokio::test]
async fn test_empty_recipients_is_a_no_op() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", Vec::new());

    let mut progress_calls = 0;
    let outcome = d.dispatch(&request, |_| progress_calls += 1).await.unwrap();

    assert_eq!(outcome.success_count, 0);
    assert_eq!(outcome.failure_count, 0);
    assert_eq!(outcome.total_count, 0);
    assert_eq!(outcome.summary(), DispatchSummary::Empty);
    assert_eq!(progress_calls, 0);
    assert!(capability.sent().is_empty());
    assert_eq!(capability.availability_checks.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_strictly_increasing() {
    let capability = Arc::new(ScriptedCapability::new(vec![
        Ok(SendStatus::Sent),
        Err(SendError::Timeout),
        Ok(SendStatus::Sent),
        Ok(SendStatus::Unknown),
    ]));
    let d = dispatcher(capability);
    let request = DispatchRequest::new("Help", recipients(4));

    let mut seen: Vec<DispatchProgress> = Vec::new();
    d.dispatch(&request, |p| seen.push(p)).await.unwrap();

    assert_eq!(seen.len(), 4);
    for (i, progress) in seen.iter().enumerate() {
        assert_eq!(progress.sent_so_far, i + 1);
        assert_eq!(progress.total, 4);
    }
    assert!(seen.last().unwrap().is_complete());
}

#[tokio::test]
async fn test_message_includes_map_link() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("I need help", recipients(1))
        .with_location(LocationFix::new(40.7128, -74.0060));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    let body = &capability.sent()[0].body;
    assert!(body.contains("https://www.google.com/maps?q=40.7128,-74.006"));
    assert!(body.starts_with("I need help\n\n"));
    assert!(outcome.location_attached);
}

#[tokio::test]
async fn test_message_without_location_is_trimmed_input() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("  I need help  \n", recipients(1));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    assert_eq!(capability.sent()[0].body, "I need help");
    assert!(!outcome.location_attached);
}

#[tokio::test]
async fn test_provider_location_used_when_request_has_none() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher_with(capability.clone(), Arc::new(StaticLocationProvider::new(51.5, -0.12)));
    let request = DispatchRequest::new("Help", recipients(1));

    d.dispatch(&request, |_| {}).await.unwrap();

    assert!(capability.sent()[0].body.ends_with("https://www.google.com/maps?q=51.5,-0.12"));
}

#[tokio::test(start_paused = true)]
async fn test_location_timeout_does_not_fail_run() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher_with(capability.clone(), Arc::new(HangingLocationProvider));
    let request = DispatchRequest::new("Help", recipients(2));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    assert_eq!(outcome.success_count, 2);
    assert!(!outcome.location_attached);
    assert!(capability.sent().iter().all(|m| m.body == "Help"));
}

#[tokio::test(start_paused = true)]
async fn test_error_on_second_recipient_does_not_abort() {
    let capability = Arc::new(ScriptedCapability::new(vec![
        Ok(SendStatus::Sent),
        Err(SendError::Transport("radio off".to_string())),
        Ok(SendStatus::Sent),
    ]));
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(3));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failure_count, 1);
    assert_eq!(outcome.total_count, 3);

    let sent = capability.sent();
    assert_eq!(sent.len(), 3);
    let order: Vec<&str> = sent.iter().map(|m| m.to[0].as_str()).collect();
    assert_eq!(order, vec!["+15550000001", "+15550000002", "+15550000003"]);

    assert_eq!(
        outcome.results[1].outcome,
        RecipientOutcome::Failed(FailureReason::Error("Transport error: radio off".to_string()))
    );
    assert_eq!(
        outcome.summary(),
        DispatchSummary::PartialSuccess { sent: 2, total: 3 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_sent_status_is_failure_with_reason() {
    let capability = Arc::new(ScriptedCapability::new(vec![Ok(SendStatus::Cancelled)]));
    let d = dispatcher(capability);
    let request = DispatchRequest::new("Help", recipients(1));

    let outcome = d.dispatch(&request, |_| {}).await.unwrap();

    assert_eq!(outcome.failure_count, 1);
    assert_eq!(
        outcome.results[0].outcome,
        RecipientOutcome::Failed(FailureReason::Status(SendStatus::Cancelled))
    );
    assert_eq!(outcome.summary(), DispatchSummary::NoneSent { total: 1 });
}

#[tokio::test(start_paused = true)]
async fn test_delay_between_sends() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(3));

    let start = Instant::now();
    d.dispatch(&request, |_| {}).await.unwrap();

    let sent = capability.sent();
    assert_eq!(sent[0].at.duration_since(start), Duration::ZERO);
    assert!(sent[1].at.duration_since(sent[0].at) >= Duration::from_millis(2000));
    assert!(sent[2].at.duration_since(sent[1].at) >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_custom_delay() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let config = DispatcherConfig {
        inter_message_delay: Duration::from_millis(500),
        ..Default::default()
    };
    let d = Dispatcher::new(config, capability.clone(), Arc::new(NoLocationProvider));

    d.dispatch(&DispatchRequest::new("Help", recipients(2)), |_| {})
        .await
        .unwrap();

    let sent = capability.sent();
    let gap = sent[1].at.duration_since(sent[0].at);
    assert!(gap >= Duration::from_millis(500));
    assert!(gap < Duration::from_millis(2000));
}

#[tokio::test]
async fn test_unavailable_capability_rejects_run() {
    let capability = Arc::new(ScriptedCapability::unavailable());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(2));

    let mut progress_calls = 0;
    let result = d.dispatch(&request, |_| progress_calls += 1).await;

    assert_eq!(result.unwrap_err(), DispatchError::CapabilityUnavailable);
    assert!(capability.sent().is_empty());
    assert_eq!(progress_calls, 0);
    assert_eq!(d.state(), RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_run_keeps_previous_outcome() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(2));

    let first = d.dispatch(&request, |_| {}).await.unwrap();
    assert_eq!(first.success_count, 2);

    capability.set_available(false);
    let result = d.dispatch(&request, |_| {}).await;

    assert_eq!(result.unwrap_err(), DispatchError::CapabilityUnavailable);
    assert_eq!(d.state(), RunState::Completed(first));
    assert!(!d.is_running());
}

#[tokio::test]
async fn test_blank_message_rejected() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new(" \t\n", recipients(2));

    let result = d.dispatch(&request, |_| {}).await;

    assert_eq!(result.unwrap_err(), DispatchError::MessageEmpty);
    assert!(capability.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_run_rejected_while_running() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = Arc::new(dispatcher(capability.clone()));
    let request = DispatchRequest::new("Help", recipients(3));

    let first = {
        let d = d.clone();
        let request = request.clone();
        tokio::spawn(async move { d.dispatch(&request, |_| {}).await })
    };

    while !d.is_running() {
        tokio::task::yield_now().await;
    }
    assert!(matches!(d.state(), RunState::Running(_)));

    let second = d.dispatch(&request, |_| {}).await;
    assert_eq!(second.unwrap_err(), DispatchError::AlreadyRunning);

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.success_count, 3);
    assert_eq!(capability.sent().len(), 3);
    assert!(matches!(d.state(), RunState::Completed(_)));

    // the dispatcher accepts a new run once the first has completed
    let again = d.dispatch(&request, |_| {}).await.unwrap();
    assert_eq!(again.success_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_recipients() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(3));
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let outcome = d
        .dispatch_with_cancel(&request, &cancel, move |p| {
            if p.sent_so_far == 1 {
                token.cancel();
            }
        })
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.skipped_count, 2);
    assert_eq!(
        outcome.success_count + outcome.failure_count + outcome.skipped_count,
        outcome.total_count
    );
    assert_eq!(outcome.results[2].outcome, RecipientOutcome::Skipped);
    assert_eq!(capability.sent().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_sends_nothing() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = d
        .dispatch_with_cancel(&DispatchRequest::new("Help", recipients(2)), &cancel, |_| {})
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.skipped_count, 2);
    assert!(capability.sent().is_empty());
}

#[tokio::test]
async fn test_broadcast_single_call() {
    let capability = Arc::new(ScriptedCapability::all_sent());
    let d = dispatcher(capability.clone());
    let request = DispatchRequest::new("Help", recipients(3))
        .with_location(LocationFix::new(40.7128, -74.0060));

    let outcome = d.broadcast(&request).await.unwrap();

    let sent = capability.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.len(), 3);
    assert!(sent[0].body.contains("maps?q=40.7128,-74.006"));
    assert_eq!(outcome.success_count, 3);
    assert_eq!(outcome.summary(), DispatchSummary::AllSent { total: 3 });
}

#[tokio::test]
async fn test_broadcast_failure_marks_everyone() {
    let capability = Arc::new(ScriptedCapability::new(vec![Ok(SendStatus::Unknown)]));
    let d = dispatcher(capability);

    let outcome = d
        .broadcast(&DispatchRequest::new("Help", recipients(2)))
        .await
        .unwrap();

    assert_eq!(outcome.failure_count, 2);
    assert_eq!(outcome.success_count, 0);
    assert!(!outcome.summary().any_sent());
}
