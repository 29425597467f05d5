//! Serializable checkpoint of a whole campaign.

use serde::{Deserialize, Serialize};

use super::{CampaignProgress, CampaignStatus, MessageTemplate, Recipient, SendingPolicy};

/// Everything needed to resume a campaign after a pause or a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSnapshot {
    pub template: MessageTemplate,
    pub recipients: Vec<Recipient>,
    pub policy: SendingPolicy,
    pub progress: CampaignProgress,
    /// Epoch milliseconds of the last write.
    pub last_updated: i64,
}

impl CampaignSnapshot {
    pub fn new(
        template: MessageTemplate,
        recipients: Vec<Recipient>,
        policy: SendingPolicy,
        progress: CampaignProgress,
        last_updated: i64,
    ) -> Self {
        Self {
            template,
            recipients,
            policy,
            progress,
            last_updated,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.progress.campaign_id
    }

    pub fn status(&self) -> CampaignStatus {
        self.progress.status
    }

    /// Progress invariants hold and the recipient list matches `total`.
    pub fn is_consistent(&self) -> bool {
        self.progress.is_consistent() && self.progress.total == self.recipients.len()
    }
}
