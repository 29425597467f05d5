//! Error types for the campaign engine.
//!
//! Per-recipient failures ([`DispatchFailure`]) are absorbed by the dispatch
//! loop and recorded on the campaign. Everything else surfaces to the caller
//! as a [`CampaignError`].

use thiserror::Error;

use crate::campaign::CampaignStatus;

/// Errors raised by the durable key-value layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode campaign history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by campaign control operations.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// A dispatch loop is already active for this campaign id.
    #[error("campaign {0} already has an active dispatch loop")]
    Conflict(String),

    #[error("campaign {0} not found")]
    NotFound(String),

    #[error("cannot {action} a campaign that is {from}")]
    InvalidTransition {
        from: CampaignStatus,
        action: &'static str,
    },

    /// The campaign failed a start precondition.
    #[error("invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Why a single recipient could not be sent to.
///
/// These never abort the batch; the message is stored in the campaign's
/// error list next to the recipient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchFailure {
    #[error("{0}")]
    RateLimited(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("{0}")]
    Transport(String),
}
