//! HTTP send-email transport.
//!
//! Posts a JSON envelope to an endpoint that performs the actual SMTP
//! delivery and answers `{"success": true, "messageId": "..."}`, or
//! `{"success": false, "error": "..."}` on failure.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use super::{Envelope, SendOutcome, TransportClient};
use crate::campaign::RateLimitConfig;

/// Request body sent to the endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_body: Option<&'a str>,
    use_html: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_address: Option<&'a str>,
    rate_limits: &'a RateLimitConfig,
}

impl<'a> SendRequest<'a> {
    fn from_envelope(envelope: &'a Envelope) -> Self {
        let (body, html_body) = if envelope.is_html {
            (None, Some(envelope.body.as_str()))
        } else {
            (Some(envelope.body.as_str()), None)
        };

        Self {
            to: &envelope.to,
            subject: &envelope.subject,
            body,
            html_body,
            use_html: envelope.is_html,
            sender_name: envelope.sender.name.as_deref(),
            sender_address: envelope.sender.address.as_deref(),
            rate_limits: &envelope.rate_limits,
        }
    }
}

/// Response body returned by the endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
    message: Option<String>,
    /// Milliseconds, present on 429 answers.
    retry_after: Option<u64>,
}

/// Transport that delegates delivery to a send-email HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        let request = SendRequest::from_envelope(envelope);

        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_timeout() {
                    error!(
                        to = %envelope.to,
                        timeout_seconds = self.timeout.as_secs_f64(),
                        error = %e,
                        "transport_send_timeout"
                    );
                } else {
                    error!(to = %envelope.to, error = %e, "transport_send_error");
                }
                return SendOutcome::failed(format!("Transport request failed: {e}"));
            }
        };

        let status = response.status();
        let body: SendResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    to = %envelope.to,
                    status_code = status.as_u16(),
                    error = %e,
                    "transport_response_unreadable"
                );
                SendResponse::default()
            }
        };

        outcome_from_response(status, body, &envelope.to)
    }
}

fn outcome_from_response(status: StatusCode, body: SendResponse, to: &str) -> SendOutcome {
    if status.is_success() && body.success {
        let message_id = body.message_id.unwrap_or_else(|| "unknown".to_string());
        info!(to = %to, message_id = %message_id, "transport_send_complete");
        return SendOutcome::delivered(message_id);
    }

    let mut message = body
        .error
        .or(body.message)
        .unwrap_or_else(|| format!("Sending failed (HTTP {})", status.as_u16()));

    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(retry_after) = body.retry_after {
            message = format!("{message} (retry after {retry_after}ms)");
        }
    }

    warn!(
        to = %to,
        status_code = status.as_u16(),
        error = %message,
        "transport_send_rejected"
    );

    SendOutcome::failed(message)
}
