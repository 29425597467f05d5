//! Configuration module for environment variable parsing.
//!
//! Every setting has a default, so an empty environment gives a working
//! simulated setup writing checkpoints to `./data`.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::campaign::RateLimitConfig;
use crate::dispatch::DispatchSettings;
use crate::transport::SenderIdentity;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the control API to listen on
    pub port: u16,

    /// Directory holding the checkpoint history
    pub checkpoint_dir: PathBuf,

    /// Send-email endpoint; required unless simulating
    pub transport_url: Option<Url>,

    /// Fake delivery instead of calling the endpoint
    pub simulate_emails: bool,

    /// Probability of a simulated delivery failing (0.0 - 1.0)
    pub simulate_failure_probability: f64,

    /// Latency of each simulated delivery in milliseconds
    pub simulate_latency_ms: u64,

    pub sender_name: Option<String>,

    pub sender_address: Option<String>,

    /// Account-wide sending caps; 0 disables a window
    pub rate_limits: RateLimitConfig,

    /// Delay between two consecutive recipients in milliseconds
    pub pacing_delay_ms: u64,

    /// Pause between batches in continuous mode, in milliseconds
    pub continuous_batch_pause_ms: u64,

    /// Checkpoint every this many processed recipients
    pub checkpoint_every: usize,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    // =========================================================================
    // Headless worker
    // =========================================================================

    /// JSON campaign definition to start
    pub campaign_file: Option<PathBuf>,

    /// Paused campaign to resume instead of starting a new one
    pub resume_campaign_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_or("PORT", 8080),

            checkpoint_dir: env::var("CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),

            transport_url: parse_url("TRANSPORT_URL"),

            simulate_emails: parse_bool("SIMULATE_EMAILS", false),

            simulate_failure_probability: parse_or("SIMULATE_FAILURE_PROBABILITY", 0.0_f64)
                .clamp(0.0, 1.0),

            simulate_latency_ms: parse_or("SIMULATE_LATENCY_MS", 500),

            sender_name: non_empty("SENDER_NAME"),

            sender_address: non_empty("SENDER_ADDRESS"),

            rate_limits: RateLimitConfig {
                per_second: parse_or("RATE_LIMIT_PER_SECOND", 0),
                per_minute: parse_or("RATE_LIMIT_PER_MINUTE", 0),
                per_hour: parse_or("RATE_LIMIT_PER_HOUR", 0),
                per_day: parse_or("RATE_LIMIT_PER_DAY", 0),
                enabled: parse_bool("RATE_LIMIT_ENABLED", false),
            },

            pacing_delay_ms: parse_or("PACING_DELAY_MS", 1000),

            continuous_batch_pause_ms: parse_or("CONTINUOUS_BATCH_PAUSE_MS", 500),

            checkpoint_every: parse_or("CHECKPOINT_EVERY", 5_usize).max(1),

            request_timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 15000),

            campaign_file: non_empty("CAMPAIGN_FILE").map(PathBuf::from),

            resume_campaign_id: non_empty("RESUME_CAMPAIGN_ID"),
        }
    }

    /// Loop tunables derived from this configuration.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            pacing_delay: Duration::from_millis(self.pacing_delay_ms),
            continuous_batch_pause: Duration::from_millis(self.continuous_batch_pause_ms),
            checkpoint_every: self.checkpoint_every,
            rate_limits: self.rate_limits,
            sender: SenderIdentity {
                name: self.sender_name.clone(),
                address: self.sender_address.clone(),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse a variable, falling back to `default` when unset or invalid.
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

fn parse_url(name: &str) -> Option<Url> {
    let raw = non_empty(name)?;
    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(env_var = name, value = %raw, error = %e, "Invalid URL, ignoring");
            None
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
