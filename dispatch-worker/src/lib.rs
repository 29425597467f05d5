//! Mailrun - rate-limited, resumable bulk email campaign dispatcher.
//!
//! This library provides the engine shared by the two Mailrun binaries:
//! - `mailrun-web`: HTTP control API for starting and steering campaigns
//! - `mailrun-worker`: runs one campaign headless until done or interrupted
//!
//! ## Architecture
//!
//! ```text
//! API / worker → CampaignManager → Dispatcher ─┬→ RateLimiter
//!                                              ├→ MessageRenderer
//!                                              ├→ TransportClient
//!                                              └→ CheckpointStore → PersistenceStore
//! ```

pub mod campaign;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod rate_limit;
pub mod render;
pub mod transport;
pub mod web;

// Re-export commonly used types
pub use campaign::{
    CampaignProgress, CampaignSnapshot, CampaignStatus, MessageTemplate, ProgressView,
    RateLimitConfig, Recipient, SendingMode, SendingPolicy,
};
pub use checkpoint::{CheckpointStore, FileStore, MemoryStore, PersistenceStore};
pub use config::Config;
pub use dispatch::{
    CampaignManager, DispatchEvent, DispatchSettings, Dispatcher, ProgressObserver, RunControl,
    StartCampaign,
};
pub use error::{CampaignError, DispatchFailure, PersistenceError};
pub use rate_limit::{RateDecision, RateLimiter, Window};
pub use web::AppState;
