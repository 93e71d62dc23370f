//! Telemetry event model shared by the gateway and the detector.
//!
//! One event describes one completed request/response pair observed at the
//! gateway. Field names on the wire are camelCase to match the telemetry
//! ingestion contract.

use serde::{Deserialize, Serialize};

use crate::core::sliding_window::Timestamped;

/// Outcome of an authentication attempt, when the request was one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthResult {
    Success,
    Fail,
}

/// Business service a request was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTarget {
    Auth,
    Data,
    Billing,
}

/// One observed request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Milliseconds since the Unix epoch; zero means "missing" at ingress
    #[serde(default)]
    pub ts: u64,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub bytes_out: u64,
    #[serde(default)]
    pub auth_result: Option<AuthResult>,
    #[serde(default)]
    pub service_target: Option<ServiceTarget>,
}

impl Timestamped for TelemetryEvent {
    fn ts(&self) -> u64 {
        self.ts
    }
}

/// Map a request path onto the business service it targets
pub fn service_target_for(path: &str) -> Option<ServiceTarget> {
    if path.starts_with("/auth") {
        Some(ServiceTarget::Auth)
    } else if path.starts_with("/data") {
        Some(ServiceTarget::Data)
    } else if path.starts_with("/billing") {
        Some(ServiceTarget::Billing)
    } else {
        None
    }
}
