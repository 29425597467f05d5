//! Personalisation of the campaign message for each recipient.
//!
//! Tokens look like `{{firstName}}` (surrounding whitespace inside the braces
//! is ignored). A token resolves against the recipient's standard fields
//! first, then its custom fields; anything unresolved becomes an empty string.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::campaign::{MessageTemplate, Recipient};
use crate::error::DispatchFailure;

/// Message ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    /// HTML when `is_html`, plain text otherwise.
    pub body: String,
    pub is_html: bool,
}

/// Renders template strings for a recipient.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, template: &str, recipient: &Recipient) -> Result<String, DispatchFailure>;

    /// Render the subject and whichever body `use_html` selects.
    fn render_message(
        &self,
        template: &MessageTemplate,
        recipient: &Recipient,
    ) -> Result<RenderedMessage, DispatchFailure> {
        Ok(RenderedMessage {
            subject: self.render(&template.subject, recipient)?,
            body: self.render(template.active_body(), recipient)?,
            is_html: template.use_html,
        })
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("Invalid token pattern"))
}

/// `{{token}}` substitution renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl MessageRenderer for TemplateRenderer {
    fn render(&self, template: &str, recipient: &Recipient) -> Result<String, DispatchFailure> {
        let rendered = token_pattern().replace_all(template, |caps: &Captures<'_>| {
            let name = caps[1].trim();
            lookup(recipient, name).unwrap_or_default().to_string()
        });
        Ok(rendered.into_owned())
    }
}

fn lookup<'a>(recipient: &'a Recipient, name: &str) -> Option<&'a str> {
    recipient
        .named_field(name)
        .or_else(|| recipient.custom_fields.get(name).map(String::as_str))
}

/// Token names used in `template`, in first-seen order, without duplicates.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in token_pattern().captures_iter(template) {
        let name = caps[1].trim();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Tokens in `template` that `recipient` cannot resolve.
pub fn missing_variables(template: &str, recipient: &Recipient) -> Vec<String> {
    extract_variables(template)
        .into_iter()
        .filter(|name| lookup(recipient, name).is_none())
        .collect()
}
