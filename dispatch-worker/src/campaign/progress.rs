//! Campaign progress and its state machine.
//!
//! ```text
//!            start                 pause
//!   Idle ───────────▶ Running ◀──────────────▶ Paused
//!                      │  ▲        resume        │
//!          exhausted   │  │ restart              │ cancel
//!                      ▼  │                      ▼
//!            Completed / Failed / Cancelled ◀────┘
//! ```
//!
//! Counters only ever move forward while Running. The dispatch loop is the
//! only writer of counters; control requests only change status fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Cancelled,
    Completed,
    /// Every recipient was processed but none succeeded, or the run aborted on
    /// an internal error.
    Failed,
}

impl CampaignStatus {
    /// Terminal for the current run; only a restart leaves these.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a recipient that could not be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientError {
    /// Recipient email address.
    pub recipient: String,
    pub message: String,
}

/// Progress of one campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub campaign_id: String,
    /// Offset of the next unprocessed recipient.
    pub current_index: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub total: usize,
    #[serde(default)]
    pub errors: Vec<RecipientError>,
    pub status: CampaignStatus,
    pub start_time: Option<i64>,
    /// Set only while Paused.
    pub pause_time: Option<i64>,
    /// Milliseconds spent paused, summed over all pauses.
    #[serde(default)]
    pub total_pause_duration: i64,
    #[serde(default)]
    pub last_status_message: String,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

/// Read-only projection for progress bars and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub campaign_id: String,
    pub current_index: usize,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub status: CampaignStatus,
    pub last_status_message: String,
}

impl CampaignProgress {
    /// Fresh, idle progress for `total` recipients.
    pub fn new(campaign_id: impl Into<String>, total: usize) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            current_index: 0,
            success_count: 0,
            failed_count: 0,
            total,
            errors: Vec::new(),
            status: CampaignStatus::Idle,
            start_time: None,
            pause_time: None,
            total_pause_duration: 0,
            last_status_message: String::new(),
            completed_at: None,
        }
    }

    fn transition_error(&self, action: &'static str) -> CampaignError {
        CampaignError::InvalidTransition {
            from: self.status,
            action,
        }
    }

    /// Idle → Running.
    pub fn begin(&mut self, now: i64) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Idle {
            return Err(self.transition_error("start"));
        }
        self.status = CampaignStatus::Running;
        self.current_index = 0;
        self.success_count = 0;
        self.failed_count = 0;
        self.errors.clear();
        self.start_time = Some(now);
        self.pause_time = None;
        self.total_pause_duration = 0;
        self.last_status_message = "Starting campaign...".to_string();
        Ok(())
    }

    /// Running → Paused. `current_index` is left untouched.
    pub fn mark_paused(&mut self, now: i64) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Running {
            return Err(self.transition_error("pause"));
        }
        self.status = CampaignStatus::Paused;
        self.pause_time = Some(now);
        self.last_status_message = "Sending paused".to_string();
        Ok(())
    }

    /// Paused → Running, folding the pause into `total_pause_duration`.
    pub fn mark_resumed(&mut self, now: i64) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Paused {
            return Err(self.transition_error("resume"));
        }
        self.close_pause(now);
        self.status = CampaignStatus::Running;
        self.last_status_message = format!(
            "Resuming from recipient {}/{}...",
            (self.current_index + 1).min(self.total),
            self.total
        );
        Ok(())
    }

    /// Running/Paused → Cancelled.
    pub fn mark_cancelled(&mut self, now: i64) -> Result<(), CampaignError> {
        if !matches!(self.status, CampaignStatus::Running | CampaignStatus::Paused) {
            return Err(self.transition_error("cancel"));
        }
        self.close_pause(now);
        self.status = CampaignStatus::Cancelled;
        self.last_status_message = "Sending cancelled".to_string();
        Ok(())
    }

    /// Cancelled/Completed/Failed → Running from recipient 0, keeping the id.
    pub fn reset_for_restart(&mut self, now: i64) -> Result<(), CampaignError> {
        if !self.status.is_terminal() {
            return Err(self.transition_error("restart"));
        }
        self.status = CampaignStatus::Running;
        self.current_index = 0;
        self.success_count = 0;
        self.failed_count = 0;
        self.errors.clear();
        self.start_time = Some(now);
        self.pause_time = None;
        self.total_pause_duration = 0;
        self.completed_at = None;
        self.last_status_message = "Restarting campaign...".to_string();
        Ok(())
    }

    /// Running → Paused after an unclean shutdown, stamped with the last known
    /// activity time.
    pub fn mark_interrupted(&mut self, last_seen: i64) -> Result<(), CampaignError> {
        self.mark_paused(last_seen)?;
        self.last_status_message = "Interrupted; resume to continue".to_string();
        Ok(())
    }

    fn close_pause(&mut self, now: i64) {
        if let Some(paused_at) = self.pause_time.take() {
            self.total_pause_duration += (now - paused_at).max(0);
        }
    }

    pub fn record_success(&mut self, recipient: &str) {
        self.success_count += 1;
        self.current_index += 1;
        self.last_status_message = format!(
            "{} emails sent of {} (last: {recipient})",
            self.success_count, self.total
        );
    }

    /// A failed recipient still counts as processed.
    pub fn record_failure(&mut self, recipient: &str, message: impl Into<String>) {
        let message = message.into();
        self.failed_count += 1;
        self.current_index += 1;
        self.last_status_message = format!("Failed for {recipient}: {message}");
        self.errors.push(RecipientError {
            recipient: recipient.to_string(),
            message,
        });
    }

    /// Close the run once every recipient has been processed.
    ///
    /// Completed only with at least one success; otherwise Failed.
    pub fn finish(&mut self, now: i64) {
        if self.success_count > 0 {
            self.status = CampaignStatus::Completed;
            self.completed_at = Some(now);
            self.last_status_message = "Sending complete!".to_string();
        } else {
            self.status = CampaignStatus::Failed;
            self.last_status_message = format!(
                "Sending finished without a single success ({} failed)",
                self.failed_count
            );
        }
    }

    /// Abort the run on an internal error.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = CampaignStatus::Failed;
        self.pause_time = None;
        self.last_status_message = format!("Error: {}", message.into());
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.current_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.total
    }

    /// Counter and status invariants that every persisted snapshot must hold.
    pub fn is_consistent(&self) -> bool {
        let processed = self.success_count + self.failed_count;
        if processed > self.total || processed > self.current_index {
            return false;
        }
        if self.current_index > self.total {
            return false;
        }
        // Running with a completion stamp is both Running and Completed.
        !(self.status == CampaignStatus::Running && self.completed_at.is_some())
    }

    pub fn view(&self) -> ProgressView {
        ProgressView {
            campaign_id: self.campaign_id.clone(),
            current_index: self.current_index,
            total: self.total,
            success_count: self.success_count,
            failed_count: self.failed_count,
            status: self.status,
            last_status_message: self.last_status_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(total: usize) -> CampaignProgress {
        let mut progress = CampaignProgress::new("send-1", total);
        progress.begin(1_000).unwrap();
        progress
    }

    #[test]
    fn test_begin_only_from_idle() {
        let mut progress = running(3);
        assert_eq!(progress.status, CampaignStatus::Running);
        assert_eq!(progress.start_time, Some(1_000));
        assert!(matches!(
            progress.begin(2_000),
            Err(CampaignError::InvalidTransition { from: CampaignStatus::Running, .. })
        ));
    }

    #[test]
    fn test_pause_resume_accumulates_duration_and_keeps_index() {
        let mut progress = running(10);
        progress.record_success("a@example.com");
        progress.record_failure("b@example.com", "bounced");

        progress.mark_paused(5_000).unwrap();
        assert_eq!(progress.pause_time, Some(5_000));
        assert_eq!(progress.current_index, 2);

        progress.mark_resumed(8_000).unwrap();
        assert_eq!(progress.pause_time, None);
        assert_eq!(progress.total_pause_duration, 3_000);
        assert_eq!(progress.current_index, 2);

        progress.mark_paused(9_000).unwrap();
        progress.mark_resumed(9_500).unwrap();
        assert_eq!(progress.total_pause_duration, 3_500);
    }

    #[test]
    fn test_resume_requires_pause() {
        let mut progress = running(1);
        assert!(progress.mark_resumed(2_000).is_err());
    }

    #[test]
    fn test_cancel_from_paused_closes_pause() {
        let mut progress = running(4);
        progress.mark_paused(2_000).unwrap();
        progress.mark_cancelled(2_600).unwrap();
        assert_eq!(progress.status, CampaignStatus::Cancelled);
        assert_eq!(progress.pause_time, None);
        assert_eq!(progress.total_pause_duration, 600);
        assert!(progress.mark_cancelled(3_000).is_err());
    }

    #[test]
    fn test_restart_only_from_terminal() {
        let mut progress = running(2);
        assert!(progress.reset_for_restart(2_000).is_err());

        progress.record_success("a@example.com");
        progress.record_success("b@example.com");
        progress.finish(3_000);
        assert_eq!(progress.status, CampaignStatus::Completed);

        progress.reset_for_restart(4_000).unwrap();
        assert_eq!(progress.status, CampaignStatus::Running);
        assert_eq!(progress.campaign_id, "send-1");
        assert_eq!(progress.current_index, 0);
        assert_eq!(progress.success_count, 0);
        assert_eq!(progress.completed_at, None);
    }

    #[test]
    fn test_finish_without_success_is_failed() {
        let mut progress = running(2);
        progress.record_failure("a@example.com", "nope");
        progress.record_failure("b@example.com", "nope");
        progress.finish(5_000);
        assert_eq!(progress.status, CampaignStatus::Failed);
        assert_eq!(progress.completed_at, None);
        assert_eq!(progress.errors.len(), 2);
        assert!(progress.is_consistent());
    }

    #[test]
    fn test_consistency_checks() {
        let mut progress = running(2);
        assert!(progress.is_consistent());

        progress.success_count = 3;
        assert!(!progress.is_consistent());

        let mut progress = running(2);
        progress.completed_at = Some(1);
        assert!(!progress.is_consistent());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CampaignStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(CampaignStatus::Failed.to_string(), "failed");
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }
}
