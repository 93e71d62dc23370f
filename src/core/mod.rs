//! Core functionality for the security operations pipeline.
//!
//! This module contains the detection and containment components shared by
//! the gateway and detector services: the telemetry event model, sliding
//! windows, the two rule detectors, the incident store, the containment
//! dispatcher, and the gateway enforcement engine.

pub mod containment;
pub mod credential_stuffing;
pub mod enforcement;
pub mod event;
pub mod exfiltration;
pub mod incident;
pub mod metrics;
pub mod sliding_window;
pub mod telemetry;

pub use containment::{ContainmentRequest, EnforcementClient};
pub use credential_stuffing::CredentialStuffingDetector;
pub use enforcement::{EnforcementEngine, GateDecision, MitigationSet};
pub use event::TelemetryEvent;
pub use exfiltration::ExfiltrationDetector;
pub use incident::IncidentStore;
pub use telemetry::TelemetryClient;

use crate::models::DetectionConfig;

/// Everything the detector service mutates, behind one lock.
///
/// Request handling may interleave, but all window, incident, and metric
/// writes are serialized here; per-key event ordering (and therefore which
/// event breaches first) stays deterministic.
pub struct DetectorCore {
    pub store: IncidentStore,
    pub credstuff: CredentialStuffingDetector,
    pub exfil: ExfiltrationDetector,
}

impl DetectorCore {
    pub fn new(detection: DetectionConfig) -> Self {
        Self {
            store: IncidentStore::new(detection.window_seconds),
            credstuff: CredentialStuffingDetector::new(detection.clone()),
            exfil: ExfiltrationDetector::new(detection),
        }
    }

    /// Record one event and run both rule detectors over it.
    ///
    /// Returns the containment requests that need immediate (auto-mode)
    /// dispatch once the lock is released.
    pub fn ingest(&mut self, event: TelemetryEvent) -> Vec<ContainmentRequest> {
        let mut requests = Vec::new();
        if let Some(request) = self.credstuff.analyze(&event, &mut self.store) {
            requests.push(request);
        }
        if let Some(request) = self.exfil.analyze(&event, &mut self.store) {
            requests.push(request);
        }
        self.store.record_event(event);
        requests
    }

    /// Clear detectors and store state (admin reset).
    pub fn reset(&mut self) {
        self.credstuff.reset();
        self.exfil.reset();
        self.store.reset();
    }
}
