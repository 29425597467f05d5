//! Simulated delivery for dry runs and local testing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::info;

use super::{Envelope, SendOutcome, TransportClient};

/// Pretends to deliver each envelope after `latency`, failing with
/// `failure_probability`.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    latency: Duration,
    failure_probability: f64,
}

impl SimulatedTransport {
    pub fn new(latency: Duration, failure_probability: f64) -> Self {
        Self {
            latency,
            failure_probability: failure_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 0.0)
    }
}

#[async_trait]
impl TransportClient for SimulatedTransport {
    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        // Roll before awaiting (ThreadRng is not Send)
        let roll: f64 = rand::thread_rng().gen();

        sleep(self.latency).await;

        let will_fail = roll < self.failure_probability;

        info!(
            to = %envelope.to,
            roll = roll,
            threshold = self.failure_probability,
            will_fail = will_fail,
            "transport_simulated_send"
        );

        if will_fail {
            SendOutcome::failed("Simulated delivery failure")
        } else {
            SendOutcome::delivered(format!("simulated-{}", Utc::now().timestamp_millis()))
        }
    }
}
