//! The batch dispatch loop.
//!
//! ```text
//! ┌──────────── batch ────────────┐
//! │ for each recipient:           │
//! │   stop requested? ──► exit    │
//! │   rate limit ──► wait/recheck │
//! │   render ──► send ──► record  │
//! │   pacing delay                │
//! │   checkpoint every N          │
//! └───────────────────────────────┘
//!        │ batch completed
//!        ▼
//!  continuous pause / fixed interval ──► next batch
//! ```
//!
//! Per-recipient failures are recorded and the loop moves on. Only invalid
//! inputs or a failed checkpoint write abort the run, and every exit path
//! persists a final snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::control::{RunControl, StopReason, WaitOutcome};
use super::observer::{DispatchEvent, ProgressObserver};
use crate::campaign::{
    CampaignProgress, CampaignSnapshot, CampaignStatus, MessageTemplate, RateLimitConfig,
    Recipient, SendingMode,
};
use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::error::{CampaignError, DispatchFailure};
use crate::rate_limit::RateLimiter;
use crate::render::MessageRenderer;
use crate::transport::{Envelope, SenderIdentity, TransportClient};

/// Tunables shared by every campaign the dispatcher runs.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Delay between two consecutive recipients.
    pub pacing_delay: Duration,
    /// Pause between batches in continuous mode.
    pub continuous_batch_pause: Duration,
    /// Persist a checkpoint every this many processed recipients.
    pub checkpoint_every: usize,
    pub rate_limits: RateLimitConfig,
    pub sender: SenderIdentity,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            pacing_delay: Duration::from_millis(1000),
            continuous_batch_pause: Duration::from_millis(500),
            checkpoint_every: 5,
            rate_limits: RateLimitConfig::default(),
            sender: SenderIdentity::default(),
        }
    }
}

/// How the batch loop ended.
enum LoopExit {
    Exhausted,
    Stopped(StopReason),
}

/// What happened to one recipient.
enum RecipientOutcome {
    Sent,
    Failed(DispatchFailure),
    Interrupted(StopReason),
}

pub struct Dispatcher {
    renderer: Arc<dyn MessageRenderer>,
    transport: Arc<dyn TransportClient>,
    store: Arc<CheckpointStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ProgressObserver>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        renderer: Arc<dyn MessageRenderer>,
        transport: Arc<dyn TransportClient>,
        store: Arc<CheckpointStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn ProgressObserver>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            renderer,
            transport,
            store,
            clock,
            observer,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Empty limiter for one run. A resumed run gets a new one, so send
    /// history from before the pause never throttles it.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(Arc::clone(&self.clock))
    }

    pub(crate) fn publish(&self, progress: &CampaignProgress) {
        self.observer
            .on_event(&DispatchEvent::Progress(progress.view()));
    }

    /// Run `snapshot` from its `current_index` until exhausted, paused,
    /// cancelled, or aborted. The snapshot must already be Running.
    ///
    /// `limiter` belongs to this run alone; the loop is its only user.
    ///
    /// Returns the final snapshot, which has also been persisted.
    pub async fn dispatch(
        &self,
        mut snapshot: CampaignSnapshot,
        control: &RunControl,
        limiter: &mut RateLimiter,
    ) -> Result<CampaignSnapshot, CampaignError> {
        let campaign_id = snapshot.campaign_id().to_string();

        if snapshot.status() != CampaignStatus::Running {
            return Err(CampaignError::InvalidTransition {
                from: snapshot.status(),
                action: "dispatch",
            });
        }

        if let Err(e) = validate(&snapshot) {
            warn!(campaign_id = %campaign_id, error = %e, "dispatch_rejected");
            snapshot.progress.mark_failed(e.to_string());
            self.publish(&snapshot.progress);
            self.persist(&mut snapshot).await?;
            return Err(e);
        }

        info!(
            campaign_id = %campaign_id,
            start_index = snapshot.progress.current_index,
            total = snapshot.progress.total,
            batch_size = snapshot.policy.batch_size,
            mode = ?snapshot.policy.sending_mode,
            "dispatch_started"
        );
        self.publish(&snapshot.progress);

        let exit = self.run_batches(&mut snapshot, control, limiter).await;
        let now = self.clock.now_ms();

        match exit {
            Ok(LoopExit::Exhausted) => snapshot.progress.finish(now),
            Ok(LoopExit::Stopped(StopReason::Paused)) => {
                let paused_at = control.pause_requested_at().unwrap_or(now);
                snapshot.progress.mark_paused(paused_at)?;
            }
            Ok(LoopExit::Stopped(StopReason::Cancelled)) => {
                snapshot.progress.mark_cancelled(now)?;
            }
            Err(e) => {
                error!(campaign_id = %campaign_id, error = %e, "dispatch_aborted");
                snapshot.progress.mark_failed(e.to_string());
            }
        }

        self.publish(&snapshot.progress);
        self.persist(&mut snapshot).await?;

        let progress = &snapshot.progress;
        info!(
            campaign_id = %campaign_id,
            status = %progress.status,
            current_index = progress.current_index,
            success = progress.success_count,
            failed = progress.failed_count,
            total = progress.total,
            "dispatch_finished"
        );

        Ok(snapshot)
    }

    async fn run_batches(
        &self,
        snapshot: &mut CampaignSnapshot,
        control: &RunControl,
        limiter: &mut RateLimiter,
    ) -> Result<LoopExit, CampaignError> {
        let total = snapshot.recipients.len();
        let batch_size = snapshot.policy.batch_size;
        let checkpoint_every = self.settings.checkpoint_every.max(1);

        loop {
            if let Some(reason) = control.stop_reason() {
                return Ok(LoopExit::Stopped(reason));
            }

            let batch_start = snapshot.progress.current_index;
            if batch_start >= total {
                return Ok(LoopExit::Exhausted);
            }
            let batch_end = (batch_start + batch_size).min(total);

            debug!(
                campaign_id = %snapshot.progress.campaign_id,
                batch_start = batch_start,
                batch_end = batch_end,
                "batch_started"
            );

            for index in batch_start..batch_end {
                if let Some(reason) = control.stop_reason() {
                    return Ok(LoopExit::Stopped(reason));
                }

                let recipient = &snapshot.recipients[index];
                let outcome = self
                    .process_recipient(
                        recipient,
                        &snapshot.template,
                        &mut snapshot.progress,
                        control,
                        limiter,
                    )
                    .await;

                match outcome {
                    RecipientOutcome::Sent => {
                        snapshot.progress.record_success(&snapshot.recipients[index].email);
                    }
                    RecipientOutcome::Failed(failure) => {
                        let email = &snapshot.recipients[index].email;
                        warn!(
                            campaign_id = %snapshot.progress.campaign_id,
                            recipient = %email,
                            error = %failure,
                            "recipient_failed"
                        );
                        snapshot.progress.record_failure(email, failure.to_string());
                    }
                    RecipientOutcome::Interrupted(reason) => return Ok(LoopExit::Stopped(reason)),
                }
                self.publish(&snapshot.progress);

                if (index + 1) % checkpoint_every == 0 {
                    self.persist(snapshot).await?;
                }

                if index + 1 < total {
                    if let Some(reason) = wait_or_stop(control, self.settings.pacing_delay).await {
                        return Ok(LoopExit::Stopped(reason));
                    }
                }
            }

            self.observer.on_event(&DispatchEvent::BatchCompleted {
                campaign_id: snapshot.progress.campaign_id.clone(),
                current_index: snapshot.progress.current_index,
                total,
            });

            if batch_end >= total {
                continue;
            }

            let pause = match snapshot.policy.sending_mode {
                SendingMode::Continuous => self.settings.continuous_batch_pause,
                SendingMode::FixedInterval => {
                    let delay = snapshot.policy.delay_between_batches;
                    snapshot.progress.last_status_message =
                        format!("Waiting {delay}s before the next batch...");
                    self.publish(&snapshot.progress);
                    Duration::from_secs(delay)
                }
            };
            if let Some(reason) = wait_or_stop(control, pause).await {
                return Ok(LoopExit::Stopped(reason));
            }
        }
    }

    async fn process_recipient(
        &self,
        recipient: &Recipient,
        template: &MessageTemplate,
        progress: &mut CampaignProgress,
        control: &RunControl,
        limiter: &mut RateLimiter,
    ) -> RecipientOutcome {
        let decision = limiter.check(&self.settings.rate_limits);
        if !decision.can_send {
            info!(
                campaign_id = %progress.campaign_id,
                wait_ms = decision.wait_ms,
                reason = %decision.reason,
                "rate_limit_wait"
            );
            self.observer.on_event(&DispatchEvent::RateLimited {
                campaign_id: progress.campaign_id.clone(),
                wait_ms: decision.wait_ms,
                reason: decision.reason.clone(),
            });
            progress.last_status_message = format!(
                "{}. Resuming in {}s...",
                decision.reason,
                (decision.wait_ms + 999) / 1000
            );
            self.publish(progress);

            let wait = Duration::from_millis(decision.wait_ms.max(0) as u64);
            if let Some(reason) = wait_or_stop(control, wait).await {
                return RecipientOutcome::Interrupted(reason);
            }

            let recheck = limiter.check(&self.settings.rate_limits);
            if !recheck.can_send {
                return RecipientOutcome::Failed(DispatchFailure::RateLimited(recheck.reason));
            }
        }

        let message = match self.renderer.render_message(template, recipient) {
            Ok(message) => message,
            Err(failure) => return RecipientOutcome::Failed(failure),
        };

        progress.last_status_message = format!("Sending to {}...", recipient.email);
        self.publish(progress);

        let envelope = Envelope {
            to: recipient.email.clone(),
            subject: message.subject,
            body: message.body,
            is_html: message.is_html,
            sender: self.settings.sender.clone(),
            rate_limits: self.settings.rate_limits,
        };

        let outcome = self.transport.send(&envelope).await;
        if outcome.success {
            limiter.record();
            debug!(
                campaign_id = %progress.campaign_id,
                recipient = %recipient.email,
                message_id = outcome.message_id.as_deref().unwrap_or("unknown"),
                "recipient_sent"
            );
            RecipientOutcome::Sent
        } else {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "Sending failed".to_string());
            RecipientOutcome::Failed(DispatchFailure::Transport(message))
        }
    }

    /// Stamp and write the snapshot.
    pub(crate) async fn persist(&self, snapshot: &mut CampaignSnapshot) -> Result<(), CampaignError> {
        snapshot.last_updated = self.clock.now_ms();
        self.store.upsert(snapshot.clone()).await?;
        Ok(())
    }
}

/// Wait out `duration`, returning the stop request that cut it short.
async fn wait_or_stop(control: &RunControl, duration: Duration) -> Option<StopReason> {
    match control.wait(duration).await {
        WaitOutcome::Elapsed => None,
        WaitOutcome::Interrupted => control.stop_reason(),
    }
}

/// Start preconditions shared by new and resumed campaigns.
pub(crate) fn validate(snapshot: &CampaignSnapshot) -> Result<(), CampaignError> {
    if snapshot.recipients.is_empty() {
        return Err(CampaignError::InvalidCampaign(
            "no recipients to send to".to_string(),
        ));
    }
    snapshot.template.validate()?;
    snapshot.policy.validate()?;
    if snapshot.progress.total != snapshot.recipients.len() {
        return Err(CampaignError::InvalidCampaign(format!(
            "progress expects {} recipients but the list has {}",
            snapshot.progress.total,
            snapshot.recipients.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::SendingPolicy;
    use crate::checkpoint::MemoryStore;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::render::TemplateRenderer;
    use crate::transport::SendOutcome;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every envelope; fails the addresses in `reject`.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Envelope>>,
        reject: HashSet<String>,
    }

    #[async_trait]
    impl TransportClient for RecordingTransport {
        async fn send(&self, envelope: &Envelope) -> SendOutcome {
            self.sent.lock().unwrap().push(envelope.clone());
            if self.reject.contains(&envelope.to) {
                SendOutcome::failed("mailbox unavailable")
            } else {
                SendOutcome::delivered(format!("id-{}", envelope.to))
            }
        }
    }

    #[derive(Default)]
    struct EventLog(Mutex<Vec<DispatchEvent>>);

    impl ProgressObserver for EventLog {
        fn on_event(&self, event: &DispatchEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl EventLog {
        fn batch_indices(&self) -> Vec<usize> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    DispatchEvent::BatchCompleted { current_index, .. } => Some(*current_index),
                    _ => None,
                })
                .collect()
        }

        fn rate_waits(&self) -> Vec<i64> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    DispatchEvent::RateLimited { wait_ms, .. } => Some(*wait_ms),
                    _ => None,
                })
                .collect()
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
        events: Arc<EventLog>,
        store: Arc<CheckpointStore>,
    }

    impl Harness {
        async fn run(
            &self,
            snapshot: CampaignSnapshot,
            control: &RunControl,
        ) -> Result<CampaignSnapshot, CampaignError> {
            let mut limiter = self.dispatcher.rate_limiter();
            self.dispatcher.dispatch(snapshot, control, &mut limiter).await
        }
    }

    async fn harness(transport: RecordingTransport, rate_limits: RateLimitConfig) -> Harness {
        harness_with_clock(transport, rate_limits, Arc::new(MonotonicClock::new())).await
    }

    async fn harness_with_clock(
        transport: RecordingTransport,
        rate_limits: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Harness {
        let store = Arc::new(
            CheckpointStore::open(Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        );
        let transport = Arc::new(transport);
        let events = Arc::new(EventLog::default());
        let dispatcher = Dispatcher::new(
            Arc::new(TemplateRenderer),
            transport.clone(),
            store.clone(),
            clock,
            events.clone(),
            DispatchSettings {
                rate_limits,
                ..Default::default()
            },
        );
        Harness {
            dispatcher,
            transport,
            events,
            store,
        }
    }

    fn running_snapshot(total: usize, policy: SendingPolicy) -> CampaignSnapshot {
        let recipients = (0..total)
            .map(|i| {
                let mut r = Recipient::new(format!("r{i}@example.com"));
                r.first_name = format!("R{i}");
                r
            })
            .collect();
        let mut progress = CampaignProgress::new("send-1", total);
        progress.begin(0).unwrap();
        CampaignSnapshot::new(
            MessageTemplate {
                subject: "Hello {{firstName}}".to_string(),
                text_body: "Body for {{email}}".to_string(),
                ..Default::default()
            },
            recipients,
            policy,
            progress,
            0,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_interval_batches() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let policy = SendingPolicy {
            batch_size: 5,
            sending_mode: SendingMode::FixedInterval,
            delay_between_batches: 2,
        };

        let done = h
            .run(running_snapshot(12, policy), &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.status(), CampaignStatus::Completed);
        assert_eq!(done.progress.success_count, 12);
        assert_eq!(done.progress.current_index, 12);
        assert!(done.progress.completed_at.is_some());
        assert_eq!(h.events.batch_indices(), vec![5, 10, 12]);

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 12);
        assert_eq!(sent[3].subject, "Hello R3");
        assert_eq!(sent[3].body, "Body for r3@example.com");

        let stored = h.store.get("send-1").await.unwrap();
        assert_eq!(stored.status(), CampaignStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_then_sends() {
        let limits = RateLimitConfig {
            per_minute: 3,
            enabled: true,
            ..Default::default()
        };
        let h = harness(RecordingTransport::default(), limits).await;
        let started = tokio::time::Instant::now();

        let done = h
            .run(running_snapshot(5, SendingPolicy::default()), &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.progress.success_count, 5);
        assert_eq!(done.progress.failed_count, 0);

        let waits = h.events.rate_waits();
        assert!(!waits.is_empty());
        assert!((56_000..=57_000).contains(&waits[0]), "wait was {}", waits[0]);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_blocked_after_wait_fails_recipient() {
        // The limiter's clock never moves, so the window never drains
        let limits = RateLimitConfig {
            per_minute: 1,
            enabled: true,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(1_000_000));
        let h = harness_with_clock(RecordingTransport::default(), limits, clock).await;

        let done = h
            .run(running_snapshot(3, SendingPolicy::default()), &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.status(), CampaignStatus::Completed);
        assert_eq!(done.progress.current_index, 3);
        assert_eq!(done.progress.success_count, 1);
        assert_eq!(done.progress.failed_count, 2);
        assert_eq!(done.progress.errors[0].recipient, "r1@example.com");
        assert_eq!(done.progress.errors[0].message, "Limit of 1 emails/minute reached");
        assert_eq!(done.progress.errors[1].recipient, "r2@example.com");

        // No retry: only the first recipient ever reached the transport
        assert_eq!(h.transport.sent.lock().unwrap().len(), 1);
        assert_eq!(h.events.rate_waits(), vec![60_000, 60_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_stops_at_once() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let control = RunControl::new();
        let started = tokio::time::Instant::now();

        let run = h.run(running_snapshot(3, SendingPolicy::default()), &control);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            control.request_cancel();
        };

        let (done, ()) = tokio::join!(run, canceller);
        let done = done.unwrap();
        assert_eq!(done.status(), CampaignStatus::Cancelled);
        assert_eq!(done.progress.current_index, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_loop_continues() {
        let transport = RecordingTransport {
            reject: HashSet::from(["r1@example.com".to_string()]),
            ..Default::default()
        };
        let h = harness(transport, RateLimitConfig::default()).await;

        let done = h
            .run(running_snapshot(3, SendingPolicy::default()), &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.status(), CampaignStatus::Completed);
        assert_eq!(done.progress.success_count, 2);
        assert_eq!(done.progress.failed_count, 1);
        assert_eq!(done.progress.errors[0].recipient, "r1@example.com");
        assert_eq!(done.progress.errors[0].message, "mailbox unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_successes_end_failed() {
        let transport = RecordingTransport {
            reject: (0..2).map(|i| format!("r{i}@example.com")).collect(),
            ..Default::default()
        };
        let h = harness(transport, RateLimitConfig::default()).await;

        let done = h
            .run(running_snapshot(2, SendingPolicy::default()), &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.status(), CampaignStatus::Failed);
        assert_eq!(done.progress.completed_at, None);
        assert_eq!(done.progress.failed_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_keeps_index_for_resume() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let control = RunControl::new();
        control.request_pause(42);

        let paused = h
            .run(running_snapshot(4, SendingPolicy::default()), &control)
            .await
            .unwrap();

        assert_eq!(paused.status(), CampaignStatus::Paused);
        assert_eq!(paused.progress.current_index, 0);
        assert_eq!(paused.progress.pause_time, Some(42));
        assert!(h.transport.sent.lock().unwrap().is_empty());

        let mut resumed = paused;
        resumed.progress.mark_resumed(1_042).unwrap();
        let done = h
            .run(resumed, &RunControl::new())
            .await
            .unwrap();

        assert_eq!(done.status(), CampaignStatus::Completed);
        assert_eq!(done.progress.success_count, 4);
        assert_eq!(done.progress.total_pause_duration, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_every_five() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let control = RunControl::new();

        let run = h
            .run(running_snapshot(12, SendingPolicy::default()), &control);

        let watcher = async {
            // After the fifth send and before the sixth (pacing is 1s)
            tokio::time::sleep(Duration::from_millis(4_500)).await;
            let mid = h.store.get("send-1").await.unwrap();
            assert_eq!(mid.progress.current_index, 5);
            assert_eq!(mid.status(), CampaignStatus::Running);
        };

        let (done, ()) = tokio::join!(run, watcher);
        assert_eq!(done.unwrap().progress.success_count, 12);
    }

    #[tokio::test]
    async fn test_dispatch_requires_running_snapshot() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let mut snapshot = running_snapshot(1, SendingPolicy::default());
        snapshot.progress.status = CampaignStatus::Paused;

        let err = h
            .run(snapshot, &RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTransition { .. }));
        assert!(h.store.get("send-1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_rejected_and_persisted() {
        let h = harness(RecordingTransport::default(), RateLimitConfig::default()).await;
        let mut snapshot = running_snapshot(1, SendingPolicy::default());
        snapshot.template.subject.clear();

        let err = h
            .run(snapshot, &RunControl::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CampaignError::InvalidCampaign(_)));
        let stored = h.store.get("send-1").await.unwrap();
        assert_eq!(stored.status(), CampaignStatus::Failed);
    }
}
