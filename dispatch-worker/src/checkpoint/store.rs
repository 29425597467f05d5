//! Bounded, newest-first history of campaign snapshots.
//!
//! The whole history is stored as one JSON array under [`HISTORY_KEY`].
//! Upserting an existing campaign replaces it in place; a new campaign is
//! prepended and the oldest entry beyond [`MAX_SNAPSHOTS`] is evicted.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::PersistenceStore;
use crate::campaign::CampaignSnapshot;
use crate::error::PersistenceError;

/// Key of the history array in the persistence store.
pub const HISTORY_KEY: &str = "campaign_history";

/// Most snapshots retained.
pub const MAX_SNAPSHOTS: usize = 20;

pub struct CheckpointStore {
    backend: Arc<dyn PersistenceStore>,
    /// Mirrors the persisted array; the lock also serialises writes.
    history: Mutex<VecDeque<CampaignSnapshot>>,
}

impl CheckpointStore {
    /// Open the store, loading and validating the persisted history.
    pub async fn open(backend: Arc<dyn PersistenceStore>) -> Result<Self, PersistenceError> {
        let history = read_history(backend.as_ref()).await?;
        info!(snapshots = history.len(), "checkpoint_store_opened");

        Ok(Self {
            backend,
            history: Mutex::new(history),
        })
    }

    /// Insert or replace the snapshot for its campaign id.
    pub async fn upsert(&self, snapshot: CampaignSnapshot) -> Result<(), PersistenceError> {
        let mut history = self.history.lock().await;
        let mut updated = history.clone();

        let campaign_id = snapshot.campaign_id().to_string();
        let status = snapshot.status();

        match updated.iter().position(|s| s.campaign_id() == campaign_id) {
            Some(pos) => updated[pos] = snapshot,
            None => {
                updated.push_front(snapshot);
                while updated.len() > MAX_SNAPSHOTS {
                    if let Some(evicted) = updated.pop_back() {
                        info!(campaign_id = %evicted.campaign_id(), "checkpoint_evicted");
                    }
                }
            }
        }

        self.write(&updated).await?;
        *history = updated;

        info!(campaign_id = %campaign_id, status = %status, "checkpoint_saved");
        Ok(())
    }

    /// Re-read the persisted history, dropping entries that fail validation.
    pub async fn load_all(&self) -> Result<Vec<CampaignSnapshot>, PersistenceError> {
        let mut history = self.history.lock().await;
        *history = read_history(self.backend.as_ref()).await?;
        Ok(history.iter().cloned().collect())
    }

    /// Cached snapshot for `campaign_id`.
    pub async fn get(&self, campaign_id: &str) -> Option<CampaignSnapshot> {
        self.history
            .lock()
            .await
            .iter()
            .find(|s| s.campaign_id() == campaign_id)
            .cloned()
    }

    /// Remove one campaign. Returns whether it existed.
    pub async fn delete(&self, campaign_id: &str) -> Result<bool, PersistenceError> {
        let mut history = self.history.lock().await;
        let Some(pos) = history.iter().position(|s| s.campaign_id() == campaign_id) else {
            return Ok(false);
        };

        let mut updated = history.clone();
        updated.remove(pos);
        self.write(&updated).await?;
        *history = updated;

        info!(campaign_id = %campaign_id, "checkpoint_deleted");
        Ok(true)
    }

    /// Remove every campaign.
    pub async fn clear(&self) -> Result<(), PersistenceError> {
        let mut history = self.history.lock().await;
        self.backend.remove(HISTORY_KEY).await?;
        let removed = history.len();
        history.clear();

        info!(removed = removed, "checkpoint_history_cleared");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.history.lock().await.is_empty()
    }

    async fn write(&self, history: &VecDeque<CampaignSnapshot>) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(history)?;
        self.backend.set(HISTORY_KEY, &json).await
    }
}

/// Decode the persisted history entry by entry, so one corrupt snapshot does
/// not take the rest down with it.
async fn read_history(
    backend: &dyn PersistenceStore,
) -> Result<VecDeque<CampaignSnapshot>, PersistenceError> {
    let Some(raw) = backend.get(HISTORY_KEY).await? else {
        return Ok(VecDeque::new());
    };

    let entries: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "checkpoint_history_unreadable");
            return Ok(VecDeque::new());
        }
    };

    let mut history = VecDeque::with_capacity(entries.len().min(MAX_SNAPSHOTS));
    for (position, entry) in entries.into_iter().enumerate() {
        let snapshot: CampaignSnapshot = match serde_json::from_value(entry) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(position = position, error = %e, "snapshot_discarded_undecodable");
                continue;
            }
        };

        if !snapshot.is_consistent() {
            let progress = &snapshot.progress;
            warn!(
                campaign_id = %progress.campaign_id,
                status = %progress.status,
                success = progress.success_count,
                failed = progress.failed_count,
                current_index = progress.current_index,
                total = progress.total,
                "snapshot_discarded_inconsistent"
            );
            continue;
        }

        if history.len() == MAX_SNAPSHOTS {
            warn!(campaign_id = %snapshot.campaign_id(), "snapshot_discarded_over_capacity");
            continue;
        }

        history.push_back(snapshot);
    }

    Ok(history)
}
