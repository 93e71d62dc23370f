//! Incident model and the in-memory incident store.
//!
//! The store is the detector's source of truth: incidents and their
//! lifecycle, the mirror of the mitigation set last pushed to the gateway,
//! operator settings, derived per-service health, and the telemetry window
//! behind the pipeline metrics. Incidents are never deleted except by a
//! full reset.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::enforcement::MitigationSet;
use crate::core::event::TelemetryEvent;
use crate::core::metrics::{self, PipelineMetrics};
use crate::core::sliding_window::SlidingWindow;

/// How many raw events the operator-facing telemetry feed retains
const RECENT_EVENTS_CAP: usize = 100;

/// Errors surfaced by incident lookups and approvals
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IncidentError {
    #[error("incident not found: {0}")]
    NotFound(String),
    #[error("incident {0} has no pending actions")]
    NoPendingActions(String),
}

/// Attack pattern recognized by a rule detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackKind {
    #[serde(rename = "Credential Stuffing")]
    CredentialStuffing,
    #[serde(rename = "Data Exfiltration")]
    DataExfiltration,
}

impl AttackKind {
    /// Prefix used in deterministic incident ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            AttackKind::CredentialStuffing => "cred",
            AttackKind::DataExfiltration => "exfil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "SEV1")]
    Sev1,
    #[serde(rename = "SEV2")]
    Sev2,
    #[serde(rename = "SEV3")]
    Sev3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Contained,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Normal,
    Suspicious,
    Confirmed,
    Isolated,
    Resolved,
}

/// One step in an incident's phase history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub phase: PhaseKind,
    pub at: u64,
}

/// Evidence for one crossed threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    pub rule: String,
    pub explanation: String,
    pub observed: u64,
    pub threshold: u64,
    pub window_sec: u64,
    pub delta_pct: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Pending,
    Success,
    Fail,
}

/// What a containment action changes on the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target")]
pub enum ActionDirective {
    #[serde(rename = "BLOCK_IP", rename_all = "camelCase")]
    BlockIp { ip: String, duration_ms: u64 },
    #[serde(rename = "RATE_LIMIT", rename_all = "camelCase")]
    RateLimit {
        ip: Option<String>,
        route: String,
        limit_rps: f64,
    },
    #[serde(rename = "ISOLATE_ENDPOINT", rename_all = "camelCase")]
    IsolateEndpoint {
        route: String,
        ip: Option<String>,
        user_id: Option<String>,
    },
}

/// One mitigation action attached to an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentAction {
    #[serde(flatten)]
    pub directive: ActionDirective,
    /// When the action was applied; None while pending
    pub at: Option<u64>,
    pub result: ActionResult,
    pub mode: ActionMode,
}

impl ContainmentAction {
    pub fn queued(directive: ActionDirective, mode: ActionMode) -> Self {
        Self {
            directive,
            at: None,
            result: ActionResult::Pending,
            mode,
        }
    }
}

/// A detected attack occurrence with lifecycle and evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Deterministic: `{prefix}_{key}_{window bucket}`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttackKind,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub ip: String,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub route: String,
    pub started_at: u64,
    pub last_seen_at: u64,
    pub phases: Vec<Phase>,
    pub reasons: Vec<Reason>,
    pub actions: Vec<ContainmentAction>,
    pub pending_actions: bool,
}

impl Incident {
    /// The standard attack-onset phase history:
    /// normal shortly before the first offending event, suspicious at it,
    /// confirmed at detection time.
    pub fn onset_phases(first_offending_ts: u64, detected_at: u64) -> Vec<Phase> {
        vec![
            Phase {
                phase: PhaseKind::Normal,
                at: first_offending_ts.saturating_sub(5_000),
            },
            Phase {
                phase: PhaseKind::Suspicious,
                at: first_offending_ts,
            },
            Phase {
                phase: PhaseKind::Confirmed,
                at: detected_at,
            },
        ]
    }

    #[cfg(test)]
    pub fn test_fixture(id: &str, severity: Severity) -> Self {
        Self {
            id: id.to_string(),
            kind: AttackKind::CredentialStuffing,
            severity,
            status: IncidentStatus::Active,
            ip: "1.2.3.4".to_string(),
            user_id: None,
            tenant_id: None,
            route: "/auth/login".to_string(),
            started_at: 0,
            last_seen_at: 0,
            phases: Vec::new(),
            reasons: Vec::new(),
            actions: Vec::new(),
            pending_actions: false,
        }
    }
}

/// Structured dedup key: one incident per (attack, grouping key, bucket)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncidentKey {
    pub kind: AttackKind,
    pub ip: String,
    pub user_id: Option<String>,
    pub bucket: u64,
}

/// Global dispatch-mode setting, read at incident-creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub auto_response: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_response: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub message: String,
}

impl ServiceHealth {
    fn operational() -> Self {
        Self {
            status: HealthStatus::Green,
            message: "Operational".to_string(),
        }
    }
}

/// Health of the three fronted business services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthMap {
    pub auth: ServiceHealth,
    pub data: ServiceHealth,
    pub billing: ServiceHealth,
}

impl Default for ServiceHealthMap {
    fn default() -> Self {
        Self {
            auth: ServiceHealth::operational(),
            data: ServiceHealth::operational(),
            billing: ServiceHealth::operational(),
        }
    }
}

/// Serializable full-state snapshot for the operator surface
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub services: ServiceHealthMap,
    pub incidents: Vec<Incident>,
    pub mitigations: MitigationSet,
    pub telemetry: TelemetryFeed,
    pub metrics: PipelineMetrics,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryFeed {
    pub recent: Vec<TelemetryEvent>,
}

/// In-memory registry of incidents, mitigations, settings, and metrics
#[derive(Debug)]
pub struct IncidentStore {
    incidents: Vec<Incident>,
    pub mitigations: MitigationSet,
    pub settings: Settings,
    pub services: ServiceHealthMap,
    pub metrics: PipelineMetrics,
    recent: VecDeque<TelemetryEvent>,
    window: SlidingWindow<TelemetryEvent>,
    window_seconds: u64,
}

impl IncidentStore {
    pub fn new(window_seconds: u64) -> Self {
        Self {
            incidents: Vec::new(),
            mitigations: MitigationSet::default(),
            settings: Settings::default(),
            services: ServiceHealthMap::default(),
            metrics: PipelineMetrics::default(),
            recent: VecDeque::new(),
            window: SlidingWindow::new(window_seconds * 1000),
            window_seconds,
        }
    }

    /// Record one telemetry event and refresh the windowed metrics.
    pub fn record_event(&mut self, event: TelemetryEvent) {
        self.recent.push_back(event.clone());
        while self.recent.len() > RECENT_EVENTS_CAP {
            self.recent.pop_front();
        }
        let now = event.ts;
        self.window.record(event);
        self.refresh_metrics(now);
    }

    /// Recompute windowed rates and the anomaly score.
    pub fn refresh_metrics(&mut self, now: u64) {
        self.window.evict(now);
        let mut metrics = self.metrics.clone();
        metrics.recompute_rates(self.window.snapshot(now), self.window_seconds);
        metrics.anomaly_score = metrics::anomaly_score(&metrics, &self.incidents, &self.mitigations);
        self.metrics = metrics;
    }

    /// Insert a new incident or overwrite an existing one with the same id.
    pub fn upsert_incident(&mut self, incident: Incident) {
        match self.incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => *existing = incident,
            None => self.incidents.push(incident),
        }
        self.update_service_status();
    }

    pub fn incident(&self, id: &str) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.id == id)
    }

    pub fn incident_mut(&mut self, id: &str) -> Option<&mut Incident> {
        self.incidents.iter_mut().find(|i| i.id == id)
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    /// Replace the mitigation mirror after a containment push.
    pub fn update_mitigations(&mut self, mitigations: MitigationSet) {
        self.mitigations = mitigations;
        self.update_service_status();
    }

    /// Derive per-service health from open incidents and live mitigations.
    pub fn update_service_status(&mut self) {
        self.services = ServiceHealthMap::default();

        let open = |i: &&Incident| {
            matches!(i.status, IncidentStatus::Active | IncidentStatus::Contained)
        };

        if let Some(incident) = self
            .incidents
            .iter()
            .filter(|i| i.kind == AttackKind::CredentialStuffing)
            .find(open)
        {
            self.services.auth = match incident.status {
                IncidentStatus::Contained => ServiceHealth {
                    status: HealthStatus::Yellow,
                    message: "Attack Contained".to_string(),
                },
                _ => ServiceHealth {
                    status: HealthStatus::Red,
                    message: "Under Attack".to_string(),
                },
            };
        }

        if let Some(incident) = self
            .incidents
            .iter()
            .filter(|i| i.kind == AttackKind::DataExfiltration)
            .find(open)
        {
            self.services.data = match incident.status {
                IncidentStatus::Contained => ServiceHealth {
                    status: HealthStatus::Yellow,
                    message: "Export Isolated".to_string(),
                },
                _ => ServiceHealth {
                    status: HealthStatus::Red,
                    message: "Exfiltration Detected".to_string(),
                },
            };
        }

        if self
            .mitigations
            .isolated_endpoints
            .iter()
            .any(|rule| rule.route == "/data/export")
        {
            self.services.data = ServiceHealth {
                status: HealthStatus::Yellow,
                message: "Export Endpoint Isolated".to_string(),
            };
        }

        // Billing carries no detectors; it stays green.
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            services: self.services.clone(),
            incidents: self.incidents.clone(),
            mitigations: self.mitigations.clone(),
            telemetry: TelemetryFeed {
                recent: self.recent.iter().cloned().collect(),
            },
            metrics: self.metrics.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Full reset: incidents, mitigations, metrics, and telemetry are
    /// dropped; settings survive.
    pub fn reset(&mut self) {
        self.incidents.clear();
        self.mitigations = MitigationSet::default();
        self.services = ServiceHealthMap::default();
        self.metrics = PipelineMetrics::default();
        self.recent.clear();
        self.window = SlidingWindow::new(self.window_seconds * 1000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut store = IncidentStore::new(60);
        store.upsert_incident(Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1));
        let mut updated = Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1);
        updated.last_seen_at = 42;
        store.upsert_incident(updated);

        assert_eq!(store.incidents().len(), 1);
        assert_eq!(store.incident("cred_1.2.3.4_1").unwrap().last_seen_at, 42);
    }

    #[test]
    fn test_service_status_tracks_incident_lifecycle() {
        let mut store = IncidentStore::new(60);
        store.upsert_incident(Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1));
        assert_eq!(store.services.auth.status, HealthStatus::Red);
        assert_eq!(store.services.billing.status, HealthStatus::Green);

        store.incident_mut("cred_1.2.3.4_1").unwrap().status = IncidentStatus::Contained;
        store.update_service_status();
        assert_eq!(store.services.auth.status, HealthStatus::Yellow);
        assert_eq!(store.services.auth.message, "Attack Contained");

        store.incident_mut("cred_1.2.3.4_1").unwrap().status = IncidentStatus::Resolved;
        store.update_service_status();
        assert_eq!(store.services.auth.status, HealthStatus::Green);
    }

    #[test]
    fn test_export_isolation_degrades_data_service() {
        let mut store = IncidentStore::new(60);
        let mut mitigations = MitigationSet::default();
        mitigations
            .isolated_endpoints
            .push(crate::core::enforcement::IsolationRule {
                route: "/data/export".to_string(),
                ip: Some("5.6.7.8".to_string()),
                user_id: None,
            });
        store.update_mitigations(mitigations);
        assert_eq!(store.services.data.status, HealthStatus::Yellow);
        assert_eq!(store.services.data.message, "Export Endpoint Isolated");
    }

    #[test]
    fn test_reset_keeps_settings() {
        let mut store = IncidentStore::new(60);
        store.settings.auto_response = false;
        store.upsert_incident(Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1));
        store.reset();
        assert!(store.incidents().is_empty());
        assert!(!store.settings.auto_response);
        assert_eq!(store.services.auth.status, HealthStatus::Green);
    }

    #[test]
    fn test_recent_feed_is_capped() {
        let mut store = IncidentStore::new(60);
        for i in 0..150u64 {
            let event = crate::core::event::TelemetryEvent {
                ts: 1_000 + i,
                method: "GET".to_string(),
                route: "/data/item/1".to_string(),
                status: 200,
                latency_ms: 1,
                ip: "1.1.1.1".to_string(),
                user_id: None,
                tenant_id: None,
                bytes_out: 0,
                auth_result: None,
                service_target: None,
            };
            store.record_event(event);
        }
        assert_eq!(store.snapshot().telemetry.recent.len(), RECENT_EVENTS_CAP);
    }

    #[test]
    fn test_incident_wire_format() {
        let mut incident = Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1);
        incident.actions.push(ContainmentAction::queued(
            ActionDirective::BlockIp {
                ip: "1.2.3.4".to_string(),
                duration_ms: 900_000,
            },
            ActionMode::Auto,
        ));
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["type"], "Credential Stuffing");
        assert_eq!(json["severity"], "SEV1");
        assert_eq!(json["status"], "active");
        assert_eq!(json["pendingActions"], false);
        assert_eq!(json["actions"][0]["action"], "BLOCK_IP");
        assert_eq!(json["actions"][0]["target"]["ip"], "1.2.3.4");
        assert_eq!(json["actions"][0]["result"], "pending");
        assert_eq!(json["actions"][0]["mode"], "auto");
    }
}
