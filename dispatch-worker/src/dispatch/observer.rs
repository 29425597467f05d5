//! Progress notifications emitted by the dispatch loop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::campaign::ProgressView;

/// Something observable happened in a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Any change of counters, status, or status message.
    Progress(ProgressView),
    /// The loop is about to wait for the rate limiter.
    #[serde(rename_all = "camelCase")]
    RateLimited {
        campaign_id: String,
        wait_ms: i64,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    BatchCompleted {
        campaign_id: String,
        current_index: usize,
        total: usize,
    },
}

/// Receives dispatch events. Called inline by the loop; keep it cheap.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &DispatchEvent) {}
}

/// Latest progress per campaign, optionally forwarding every event.
#[derive(Default)]
pub struct ProgressBoard {
    latest: RwLock<HashMap<String, ProgressView>>,
    forward: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressBoard {
    pub fn new(forward: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            forward,
        }
    }

    pub fn latest(&self, campaign_id: &str) -> Option<ProgressView> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(campaign_id)
            .cloned()
    }

    pub fn remove(&self, campaign_id: &str) {
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(campaign_id);
    }

    pub fn clear(&self) {
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ProgressObserver for ProgressBoard {
    fn on_event(&self, event: &DispatchEvent) {
        if let DispatchEvent::Progress(view) = event {
            self.latest
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(view.campaign_id.clone(), view.clone());
        }

        if let Some(forward) = &self.forward {
            forward.on_event(event);
        }
    }
}
