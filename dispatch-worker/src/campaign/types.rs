//! Campaign input types: recipients, the message template, and the policies
//! that govern how fast and in what cadence the campaign is sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

// =============================================================================
// Recipients and templates
// =============================================================================

/// One imported recipient row.
///
/// `email` is the key used in error reports. Columns that do not map to a
/// standard field land in `custom_fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    /// Look up a standard field by its template token name.
    pub fn named_field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "email" => &self.email,
            "firstName" => &self.first_name,
            "lastName" => &self.last_name,
            "company" => &self.company,
            "phone" => &self.phone,
            "address" => &self.address,
            "zipCode" => &self.zip_code,
            "city" => &self.city,
            "country" => &self.country,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// Subject and bodies of the campaign message, with `{{token}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub subject: String,
    #[serde(default)]
    pub text_body: String,
    #[serde(default)]
    pub html_body: String,
    #[serde(default)]
    pub use_html: bool,
}

impl MessageTemplate {
    /// The body that will actually be sent, per `use_html`.
    pub fn active_body(&self) -> &str {
        if self.use_html {
            &self.html_body
        } else {
            &self.text_body
        }
    }

    /// Check the start preconditions: a subject and a body in the chosen format.
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.subject.trim().is_empty() {
            return Err(CampaignError::InvalidCampaign(
                "the message has no subject".to_string(),
            ));
        }
        if self.active_body().trim().is_empty() {
            let format = if self.use_html { "HTML" } else { "text" };
            return Err(CampaignError::InvalidCampaign(format!(
                "the message has no {format} body"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Throughput caps of the sending account. A cap of 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default)]
    pub per_second: u32,
    #[serde(default)]
    pub per_minute: u32,
    #[serde(default)]
    pub per_hour: u32,
    #[serde(default)]
    pub per_day: u32,
    #[serde(default)]
    pub enabled: bool,
}

impl RateLimitConfig {
    pub fn has_caps(&self) -> bool {
        self.per_second > 0 || self.per_minute > 0 || self.per_hour > 0 || self.per_day > 0
    }
}

/// Batch cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendingMode {
    /// Next batch starts after a short fixed pause.
    #[default]
    Continuous,
    /// Next batch starts after `delay_between_batches` seconds.
    FixedInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingPolicy {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub sending_mode: SendingMode,
    /// Seconds; only used in [`SendingMode::FixedInterval`].
    #[serde(default = "default_delay_between_batches")]
    pub delay_between_batches: u64,
}

impl Default for SendingPolicy {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sending_mode: SendingMode::default(),
            delay_between_batches: default_delay_between_batches(),
        }
    }
}

impl SendingPolicy {
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.batch_size == 0 {
            return Err(CampaignError::InvalidCampaign(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

const fn default_batch_size() -> usize {
    10
}

const fn default_delay_between_batches() -> u64 {
    5
}
