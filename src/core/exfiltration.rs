//! Data-exfiltration rule detector.
//!
//! Watches successful GETs on the export route, one sliding window per
//! (source IP, user) pair. Either threshold alone breaches: too many
//! export calls, or too many bytes out. Each crossed threshold reports
//! its own reason.

use std::collections::HashSet;

use log::info;
use metrics::increment_counter;

use crate::core::containment::ContainmentRequest;
use crate::core::event::TelemetryEvent;
use crate::core::incident::{
    ActionDirective, ActionMode, AttackKind, ContainmentAction, Incident, IncidentKey,
    IncidentStatus, IncidentStore, Reason, Severity,
};
use crate::core::sliding_window::{KeyedWindows, Timestamped};
use crate::models::DetectionConfig;
use crate::utils::{delta_percent, megabytes};

/// User identity fallback when the export request carried no resolved user
const UNKNOWN_USER: &str = "unknown";

/// One successful export retained in a per-(ip, user) window
#[derive(Debug, Clone)]
pub struct ExportSample {
    pub ts: u64,
    pub bytes_out: u64,
}

impl Timestamped for ExportSample {
    fn ts(&self) -> u64 {
        self.ts
    }
}

pub struct ExfiltrationDetector {
    config: DetectionConfig,
    windows: KeyedWindows<(String, String), ExportSample>,
    seen: HashSet<IncidentKey>,
}

impl ExfiltrationDetector {
    pub fn new(config: DetectionConfig) -> Self {
        let window_ms = config.window_ms();
        Self {
            config,
            windows: KeyedWindows::new(window_ms),
            seen: HashSet::new(),
        }
    }

    /// Feed one telemetry event through the detector; same contract as the
    /// credential-stuffing detector.
    pub fn analyze(
        &mut self,
        event: &TelemetryEvent,
        store: &mut IncidentStore,
    ) -> Option<ContainmentRequest> {
        if event.route != self.config.export_route || event.method != "GET" {
            return None;
        }
        // Failed or forbidden exports moved no data; skip them.
        if event.status != 200 {
            return None;
        }

        let now = event.ts;
        let user = event
            .user_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_USER.to_string());
        let window = self
            .windows
            .window_mut((event.ip.clone(), user.clone()));
        window.record(ExportSample {
            ts: now,
            bytes_out: event.bytes_out,
        });

        let mut call_count = 0u64;
        let mut total_bytes = 0u64;
        let mut first_ts = now;
        for sample in window.snapshot(now) {
            if call_count == 0 {
                first_ts = sample.ts;
            }
            call_count += 1;
            total_bytes += sample.bytes_out;
        }

        let exceeded_calls = call_count >= self.config.export_call_threshold;
        let exceeded_bytes = total_bytes >= self.config.bytes_out_threshold;
        if !exceeded_calls && !exceeded_bytes {
            return None;
        }

        let bucket = now / self.config.window_ms();
        let incident_id = format!(
            "{}_{}_{}_{}",
            AttackKind::DataExfiltration.id_prefix(),
            event.ip,
            user,
            bucket
        );
        let key = IncidentKey {
            kind: AttackKind::DataExfiltration,
            ip: event.ip.clone(),
            user_id: Some(user.clone()),
            bucket,
        };
        if self.seen.contains(&key) {
            if let Some(existing) = store.incident_mut(&incident_id) {
                existing.last_seen_at = now;
            }
            return None;
        }
        self.seen.insert(key);

        let detection_latency_ms = now.saturating_sub(first_ts);
        store.metrics.detection_latency_ms = detection_latency_ms;

        let mut reasons = Vec::new();
        if exceeded_calls {
            reasons.push(Reason {
                rule: "export_call_threshold".to_string(),
                explanation: format!(
                    "{} export calls from {} ({}) in {}s window",
                    call_count, event.ip, user, self.config.window_seconds
                ),
                observed: call_count,
                threshold: self.config.export_call_threshold,
                window_sec: self.config.window_seconds,
                delta_pct: delta_percent(call_count, self.config.export_call_threshold),
            });
        }
        if exceeded_bytes {
            reasons.push(Reason {
                rule: "bytes_out_threshold".to_string(),
                explanation: format!(
                    "{} MB exported by {} ({}) in {}s window",
                    megabytes(total_bytes),
                    event.ip,
                    user,
                    self.config.window_seconds
                ),
                observed: total_bytes,
                threshold: self.config.bytes_out_threshold,
                window_sec: self.config.window_seconds,
                delta_pct: delta_percent(total_bytes, self.config.bytes_out_threshold),
            });
        }

        let mode = if store.settings.auto_response {
            ActionMode::Auto
        } else {
            ActionMode::Manual
        };
        let auto = mode == ActionMode::Auto;

        let incident = Incident {
            id: incident_id,
            kind: AttackKind::DataExfiltration,
            severity: Severity::Sev1,
            status: IncidentStatus::Active,
            ip: event.ip.clone(),
            user_id: Some(user.clone()),
            tenant_id: event.tenant_id.clone(),
            route: self.config.export_route.clone(),
            started_at: first_ts,
            last_seen_at: now,
            phases: Incident::onset_phases(first_ts, now),
            reasons,
            actions: vec![ContainmentAction::queued(
                ActionDirective::IsolateEndpoint {
                    route: self.config.export_route.clone(),
                    ip: Some(event.ip.clone()),
                    user_id: Some(user.clone()),
                },
                mode,
            )],
            pending_actions: !auto,
        };

        info!(
            "data exfiltration detected from {} ({}): {} calls, {} MB",
            event.ip,
            user,
            call_count,
            megabytes(total_bytes)
        );
        increment_counter!("detector_incidents", "type" => "data_exfiltration");

        let request = ContainmentRequest::from_incident(&incident);
        store.upsert_incident(incident);

        auto.then_some(request)
    }

    pub fn reset(&mut self) {
        self.windows.clear();
        self.seen.clear();
    }
}
