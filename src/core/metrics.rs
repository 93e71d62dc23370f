//! Pipeline metrics derived from the detector's telemetry window.
//!
//! These drive the operator-facing `/metrics.json` surface. The anomaly
//! score is a coarse heuristic over error rate, active incidents, and
//! live mitigations, not a statistical model.

use serde::{Deserialize, Serialize};

use crate::core::enforcement::MitigationSet;
use crate::core::event::TelemetryEvent;
use crate::core::incident::{Incident, IncidentStatus, Severity};

/// Rolled-up pipeline health numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    /// Telemetry events ingested per second over the window
    pub ingest_eps: f64,
    /// Requests per second over the window
    pub rps: f64,
    /// Share of requests with status >= 400, in percent
    pub error_rate: f64,
    /// Mean request latency over the window
    pub avg_latency_ms: u64,
    /// 0-100 heuristic, see `anomaly_score`
    pub anomaly_score: u32,
    /// Time from first offending event to the latest breach
    pub detection_latency_ms: u64,
    /// Wall time of the latest enforcement push
    pub response_latency_ms: u64,
}

impl PipelineMetrics {
    /// Recompute the windowed rates from the current in-window events.
    pub fn recompute_rates<'a>(
        &mut self,
        events: impl Iterator<Item = &'a TelemetryEvent>,
        window_seconds: u64,
    ) {
        let mut count = 0u64;
        let mut errors = 0u64;
        let mut total_latency = 0u64;
        for event in events {
            count += 1;
            if event.status >= 400 {
                errors += 1;
            }
            total_latency += event.latency_ms;
        }

        if count == 0 {
            self.ingest_eps = 0.0;
            self.rps = 0.0;
            self.error_rate = 0.0;
            self.avg_latency_ms = 0;
            return;
        }

        let per_second = count as f64 / window_seconds as f64;
        self.ingest_eps = round2(per_second);
        self.rps = round2(per_second);
        self.error_rate = round2(errors as f64 / count as f64 * 100.0);
        self.avg_latency_ms = total_latency / count;
    }
}

/// Heuristic anomaly score, capped at 100
pub fn anomaly_score(
    metrics: &PipelineMetrics,
    incidents: &[Incident],
    mitigations: &MitigationSet,
) -> u32 {
    let mut score = 0;

    if metrics.error_rate > 50.0 {
        score += 40;
    } else if metrics.error_rate > 20.0 {
        score += 20;
    }

    let open: Vec<&Incident> = incidents
        .iter()
        .filter(|i| matches!(i.status, IncidentStatus::Active | IncidentStatus::Contained))
        .collect();
    if open.iter().any(|i| i.severity == Severity::Sev1) {
        score += 40;
    } else if !open.is_empty() {
        score += 20;
    }

    if !mitigations.blocked_ips.is_empty() || !mitigations.isolated_endpoints.is_empty() {
        score += 20;
    }

    score.min(100)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: u16, latency_ms: u64) -> TelemetryEvent {
        TelemetryEvent {
            ts: 0,
            method: "GET".to_string(),
            route: "/data/item/1".to_string(),
            status,
            latency_ms,
            ip: "1.1.1.1".to_string(),
            user_id: None,
            tenant_id: None,
            bytes_out: 0,
            auth_result: None,
            service_target: None,
        }
    }

    #[test]
    fn test_recompute_rates() {
        let events = vec![event(200, 10), event(500, 30), event(200, 20)];
        let mut metrics = PipelineMetrics::default();
        metrics.recompute_rates(events.iter(), 60);
        assert_eq!(metrics.rps, 0.05);
        assert_eq!(metrics.error_rate, 33.33);
        assert_eq!(metrics.avg_latency_ms, 20);
    }

    #[test]
    fn test_empty_window_zeroes_rates() {
        let mut metrics = PipelineMetrics {
            rps: 9.0,
            error_rate: 50.0,
            avg_latency_ms: 100,
            ..Default::default()
        };
        metrics.recompute_rates([].iter(), 60);
        assert_eq!(metrics.rps, 0.0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.avg_latency_ms, 0);
    }

    #[test]
    fn test_anomaly_score_caps_at_100() {
        let metrics = PipelineMetrics {
            error_rate: 80.0,
            ..Default::default()
        };
        let mut mitigations = MitigationSet::default();
        mitigations.blocked_ips.insert("1.2.3.4".to_string());
        let incidents = vec![Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1)];
        assert_eq!(anomaly_score(&metrics, &incidents, &mitigations), 100);
    }

    #[test]
    fn test_anomaly_score_quiet_system_is_zero() {
        let metrics = PipelineMetrics::default();
        assert_eq!(anomaly_score(&metrics, &[], &MitigationSet::default()), 0);
    }
}
