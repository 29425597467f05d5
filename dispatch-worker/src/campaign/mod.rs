//! Campaign data model: inputs, progress state machine, and snapshots.

pub mod progress;
pub mod snapshot;
pub mod types;

pub use progress::{CampaignProgress, CampaignStatus, ProgressView, RecipientError};
pub use snapshot::CampaignSnapshot;
pub use types::{MessageTemplate, RateLimitConfig, Recipient, SendingMode, SendingPolicy};
