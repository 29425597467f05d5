//! Message delivery collaborators.
//!
//! The dispatcher hands one [`Envelope`] per recipient to a
//! [`TransportClient`] and awaits the [`SendOutcome`]. Implementations:
//! - [`HttpTransport`]: POSTs the envelope to a send-email HTTP endpoint
//! - [`SimulatedTransport`]: fakes delivery with configurable latency and failures

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use serde::Serialize;

use crate::campaign::RateLimitConfig;

pub use http::HttpTransport;
pub use simulated::SimulatedTransport;

/// Who the campaign is sent as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderIdentity {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// A fully rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub subject: String,
    /// HTML when `is_html`, plain text otherwise.
    pub body: String,
    pub is_html: bool,
    pub sender: SenderIdentity,
    /// Passed through so the transport can apply its own enforcement.
    pub rate_limits: RateLimitConfig,
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error_message: Option<String>,
}

impl SendOutcome {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Delivers one envelope. I/O bound; called once per recipient per pass.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> SendOutcome;
}
