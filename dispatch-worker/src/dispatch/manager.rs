//! Campaign lifecycle on top of the dispatcher.
//!
//! ```text
//!            start            pause             resume
//!   Idle ──────────► Running ───────► Paused ───────────► Running
//!                      │  │              │
//!              finish  │  │ cancel       │ cancel
//!                      ▼  ▼              ▼
//!          Completed/Failed  Cancelled ◄─┘
//!                 │              │
//!                 └── restart ───┴──► Running (index 0, same id)
//! ```
//!
//! At most one dispatch loop runs per campaign id, and each run owns its rate
//! limiter. Pause and cancel only signal the loop, then wait for it to exit,
//! so once they return no further sends happen for that campaign.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::control::RunControl;
use super::dispatcher::{validate, Dispatcher};
use super::observer::ProgressBoard;
use crate::campaign::{
    CampaignProgress, CampaignSnapshot, CampaignStatus, MessageTemplate, ProgressView, Recipient,
    RecipientError, SendingPolicy,
};
use crate::error::CampaignError;
use crate::render::missing_variables;

/// Request to launch a new campaign.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCampaign {
    pub template: MessageTemplate,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub policy: SendingPolicy,
}

/// Full progress of one campaign, including per-recipient errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetails {
    #[serde(flatten)]
    pub view: ProgressView,
    pub errors: Vec<RecipientError>,
    pub start_time: Option<i64>,
    pub pause_time: Option<i64>,
    pub total_pause_duration: i64,
    pub completed_at: Option<i64>,
    pub last_updated: i64,
}

type Registry = HashMap<String, Arc<RunControl>>;

pub struct CampaignManager {
    dispatcher: Arc<Dispatcher>,
    board: Arc<ProgressBoard>,
    /// Controls of spawned loops. Also serialises lifecycle changes.
    runs: Mutex<Registry>,
}

impl CampaignManager {
    /// `board` must be the observer the dispatcher reports to.
    pub fn new(dispatcher: Arc<Dispatcher>, board: Arc<ProgressBoard>) -> Self {
        Self {
            dispatcher,
            board,
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn now(&self) -> i64 {
        self.dispatcher.clock().now_ms()
    }

    /// Validate, persist, and spawn a new campaign under a fresh id.
    pub async fn start(&self, request: StartCampaign) -> Result<ProgressView, CampaignError> {
        let campaign_id = format!("send-{}", Uuid::new_v4());
        let mut progress = CampaignProgress::new(&campaign_id, request.recipients.len());
        progress.begin(self.now())?;

        let snapshot = CampaignSnapshot::new(
            request.template,
            request.recipients,
            request.policy,
            progress,
            0,
        );
        validate(&snapshot)?;
        warn_missing_variables(&snapshot);

        info!(
            campaign_id = %campaign_id,
            recipients = snapshot.recipients.len(),
            batch_size = snapshot.policy.batch_size,
            "campaign_started"
        );

        let mut runs = self.runs.lock().await;
        self.launch(&mut runs, snapshot).await
    }

    /// Ask the loop to stop before its next recipient and wait until it has.
    pub async fn pause(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        let mut runs = self.runs.lock().await;
        if let Some(control) = active(&mut runs, campaign_id) {
            drop(runs);
            control.request_pause(self.now());
            info!(campaign_id = %campaign_id, "campaign_pause_requested");
            control.finished().await;
            return self.current_view(campaign_id).await;
        }

        let mut snapshot = self.snapshot(campaign_id).await?;
        if snapshot.status() != CampaignStatus::Running {
            return Err(CampaignError::InvalidTransition {
                from: snapshot.status(),
                action: "pause",
            });
        }

        // Running without a loop: the process died mid-run
        let last_seen = snapshot.last_updated;
        snapshot.progress.mark_interrupted(last_seen)?;
        self.save(&mut snapshot).await?;
        Ok(snapshot.progress.view())
    }

    /// Continue a paused campaign from its `current_index`.
    pub async fn resume(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        let mut runs = self.runs.lock().await;
        if active(&mut runs, campaign_id).is_some() {
            return Err(CampaignError::Conflict(campaign_id.to_string()));
        }

        let mut snapshot = self.snapshot(campaign_id).await?;
        snapshot.progress.mark_resumed(self.now())?;

        info!(
            campaign_id = %campaign_id,
            resume_index = snapshot.progress.current_index,
            total = snapshot.progress.total,
            "campaign_resumed"
        );

        self.launch(&mut runs, snapshot).await
    }

    /// Stop a running or paused campaign for good.
    pub async fn cancel(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        let mut runs = self.runs.lock().await;
        if let Some(control) = active(&mut runs, campaign_id) {
            drop(runs);
            control.request_cancel();
            info!(campaign_id = %campaign_id, "campaign_cancel_requested");
            control.finished().await;
            return self.current_view(campaign_id).await;
        }

        let mut snapshot = self.snapshot(campaign_id).await?;
        snapshot.progress.mark_cancelled(self.now())?;
        self.save(&mut snapshot).await?;

        info!(campaign_id = %campaign_id, "campaign_cancelled");
        Ok(snapshot.progress.view())
    }

    /// Run a finished campaign again from the first recipient, same id.
    pub async fn restart(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        let mut runs = self.runs.lock().await;
        if active(&mut runs, campaign_id).is_some() {
            return Err(CampaignError::Conflict(campaign_id.to_string()));
        }

        let mut snapshot = self.snapshot(campaign_id).await?;
        snapshot.progress.reset_for_restart(self.now())?;

        info!(campaign_id = %campaign_id, "campaign_restarted");
        self.launch(&mut runs, snapshot).await
    }

    pub async fn progress(&self, campaign_id: &str) -> Result<CampaignDetails, CampaignError> {
        let snapshot = self.snapshot(campaign_id).await?;
        let progress = &snapshot.progress;
        let view = self
            .board
            .latest(campaign_id)
            .unwrap_or_else(|| progress.view());

        Ok(CampaignDetails {
            view,
            errors: progress.errors.clone(),
            start_time: progress.start_time,
            pause_time: progress.pause_time,
            total_pause_duration: progress.total_pause_duration,
            completed_at: progress.completed_at,
            last_updated: snapshot.last_updated,
        })
    }

    /// Newest-first summary of every retained campaign.
    pub async fn history(&self) -> Result<Vec<ProgressView>, CampaignError> {
        let snapshots = self.dispatcher.store().load_all().await?;
        Ok(snapshots
            .iter()
            .map(|s| {
                self.board
                    .latest(s.campaign_id())
                    .unwrap_or_else(|| s.progress.view())
            })
            .collect())
    }

    pub async fn delete(&self, campaign_id: &str) -> Result<(), CampaignError> {
        let mut runs = self.runs.lock().await;
        if active(&mut runs, campaign_id).is_some() {
            return Err(CampaignError::Conflict(campaign_id.to_string()));
        }

        if !self.dispatcher.store().delete(campaign_id).await? {
            return Err(CampaignError::NotFound(campaign_id.to_string()));
        }
        self.board.remove(campaign_id);
        Ok(())
    }

    /// Drop the whole history. Refused while any campaign is running.
    pub async fn clear(&self) -> Result<(), CampaignError> {
        let mut runs = self.runs.lock().await;
        prune_finished(&mut runs);
        if let Some(campaign_id) = runs.keys().next() {
            return Err(CampaignError::Conflict(campaign_id.clone()));
        }

        self.dispatcher.store().clear().await?;
        self.board.clear();
        Ok(())
    }

    /// Turn campaigns left Running by a dead process into Paused ones.
    ///
    /// Call once at startup, before accepting control requests.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, CampaignError> {
        let mut runs = self.runs.lock().await;
        let mut recovered = Vec::new();

        for mut snapshot in self.dispatcher.store().load_all().await? {
            if snapshot.status() != CampaignStatus::Running {
                continue;
            }
            if active(&mut runs, snapshot.campaign_id()).is_some() {
                continue;
            }

            let last_seen = snapshot.last_updated;
            snapshot.progress.mark_interrupted(last_seen)?;
            self.dispatcher.store().upsert(snapshot.clone()).await?;
            self.dispatcher.publish(&snapshot.progress);

            warn!(
                campaign_id = %snapshot.campaign_id(),
                current_index = snapshot.progress.current_index,
                total = snapshot.progress.total,
                last_seen = last_seen,
                "campaign_interrupted"
            );
            recovered.push(snapshot.progress.campaign_id);
        }

        Ok(recovered)
    }

    /// Wait for the campaign's loop to exit, if one is running.
    pub async fn wait(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        let control = {
            let mut runs = self.runs.lock().await;
            active(&mut runs, campaign_id)
        };
        if let Some(control) = control {
            control.finished().await;
        }
        self.current_view(campaign_id).await
    }

    /// Pause every running campaign, e.g. on shutdown.
    pub async fn pause_all(&self) -> Vec<String> {
        let controls: Vec<(String, Arc<RunControl>)> = {
            let mut runs = self.runs.lock().await;
            prune_finished(&mut runs);
            runs.iter()
                .map(|(id, control)| (id.clone(), Arc::clone(control)))
                .collect()
        };

        let now = self.now();
        for (campaign_id, control) in &controls {
            control.request_pause(now);
            info!(campaign_id = %campaign_id, "campaign_pause_requested");
        }
        for (_, control) in &controls {
            control.finished().await;
        }

        controls.into_iter().map(|(id, _)| id).collect()
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let mut runs = self.runs.lock().await;
        prune_finished(&mut runs);
        runs.keys().cloned().collect()
    }

    /// Persist `snapshot` and spawn its loop. Caller holds the registry lock.
    async fn launch(
        &self,
        runs: &mut Registry,
        mut snapshot: CampaignSnapshot,
    ) -> Result<ProgressView, CampaignError> {
        let campaign_id = snapshot.campaign_id().to_string();
        if active(runs, &campaign_id).is_some() {
            return Err(CampaignError::Conflict(campaign_id));
        }

        self.save(&mut snapshot).await?;
        let view = snapshot.progress.view();

        let control = Arc::new(RunControl::new());
        runs.insert(campaign_id.clone(), Arc::clone(&control));

        let dispatcher = Arc::clone(&self.dispatcher);
        let mut limiter = dispatcher.rate_limiter();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(snapshot, &control, &mut limiter).await {
                error!(campaign_id = %campaign_id, error = %e, "dispatch_failed");
            }
            control.mark_finished();
        });

        Ok(view)
    }

    async fn snapshot(&self, campaign_id: &str) -> Result<CampaignSnapshot, CampaignError> {
        self.dispatcher
            .store()
            .get(campaign_id)
            .await
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_string()))
    }

    async fn save(&self, snapshot: &mut CampaignSnapshot) -> Result<(), CampaignError> {
        self.dispatcher.persist(snapshot).await?;
        self.dispatcher.publish(&snapshot.progress);
        Ok(())
    }

    async fn current_view(&self, campaign_id: &str) -> Result<ProgressView, CampaignError> {
        if let Some(view) = self.board.latest(campaign_id) {
            return Ok(view);
        }
        Ok(self.snapshot(campaign_id).await?.progress.view())
    }
}

/// Tokens that some recipients cannot fill render as empty strings.
fn warn_missing_variables(snapshot: &CampaignSnapshot) {
    let template = &snapshot.template;
    let mut missing: Vec<String> = Vec::new();
    let mut affected = 0;

    for recipient in &snapshot.recipients {
        let mut any = false;
        for text in [template.subject.as_str(), template.active_body()] {
            for name in missing_variables(text, recipient) {
                any = true;
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
        if any {
            affected += 1;
        }
    }

    if affected > 0 {
        warn!(
            campaign_id = %snapshot.campaign_id(),
            recipients = affected,
            variables = %missing.join(","),
            "template_variables_missing"
        );
    }
}

/// Control of the live loop for `campaign_id`, if any.
fn active(runs: &mut Registry, campaign_id: &str) -> Option<Arc<RunControl>> {
    prune_finished(runs);
    runs.get(campaign_id).cloned()
}

fn prune_finished(runs: &mut Registry) {
    runs.retain(|_, control| !control.is_finished());
}
