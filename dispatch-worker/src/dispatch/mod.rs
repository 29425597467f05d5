//! Campaign dispatch: the batch loop, its control signals, and the
//! lifecycle manager that owns running loops.

pub mod control;
pub mod dispatcher;
pub mod manager;
pub mod observer;

pub use control::{CancelToken, RunControl, StopReason, WaitOutcome};
pub use dispatcher::{DispatchSettings, Dispatcher};
pub use manager::{CampaignDetails, CampaignManager, StartCampaign};
pub use observer::{DispatchEvent, NoopObserver, ProgressBoard, ProgressObserver};
