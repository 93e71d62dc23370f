//! Gateway-side telemetry emission.
//!
//! One event per completed business request, posted to the detector on a
//! detached task. Delivery is fire-and-forget: a short timeout, a single
//! attempt, and failures logged without ever touching the request path
//! that produced the event.

use log::debug;
use metrics::increment_counter;
use reqwest::Client;

use crate::core::event::TelemetryEvent;

/// HTTP client for pushing telemetry events to the detector
#[derive(Clone)]
pub struct TelemetryClient {
    client: Client,
    endpoint: String,
}

impl TelemetryClient {
    pub fn new(detector_url: &str, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/telemetry", detector_url.trim_end_matches('/')),
        })
    }

    /// Send one event on a detached task. Never blocks, never fails the
    /// caller; the detector simply not receiving the event is the only
    /// externally visible symptom of a delivery problem.
    pub fn send(&self, event: TelemetryEvent) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            increment_counter!("gateway_telemetry_events");
            match client.post(&endpoint).json(&event).send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!("telemetry sink responded {}", response.status());
                }
                Ok(_) => {}
                Err(err) => {
                    debug!("telemetry send failed: {}", err);
                }
            }
        });
    }
}
