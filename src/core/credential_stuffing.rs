//! Credential-stuffing rule detector.
//!
//! Watches POSTs to the login route, one sliding window per source IP.
//! A breach requires both thresholds in the same window: enough failed
//! logins AND enough distinct targeted user ids. One incident per
//! (IP, window bucket); re-triggers inside the bucket only bump
//! `lastSeenAt`.

use std::collections::{HashMap, HashSet};

use log::info;
use metrics::increment_counter;

use crate::core::containment::ContainmentRequest;
use crate::core::event::{AuthResult, TelemetryEvent};
use crate::core::incident::{
    ActionDirective, ActionMode, AttackKind, ContainmentAction, Incident, IncidentKey,
    IncidentStatus, IncidentStore, Reason, Severity,
};
use crate::core::sliding_window::{KeyedWindows, Timestamped};
use crate::models::DetectionConfig;
use crate::utils::delta_percent;

/// One login attempt retained in a per-IP window
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub ts: u64,
    pub user_id: Option<String>,
    pub auth_result: Option<AuthResult>,
}

impl Timestamped for LoginAttempt {
    fn ts(&self) -> u64 {
        self.ts
    }
}

pub struct CredentialStuffingDetector {
    config: DetectionConfig,
    windows: KeyedWindows<String, LoginAttempt>,
    seen: HashSet<IncidentKey>,
}

impl CredentialStuffingDetector {
    pub fn new(config: DetectionConfig) -> Self {
        let window_ms = config.window_ms();
        Self {
            config,
            windows: KeyedWindows::new(window_ms),
            seen: HashSet::new(),
        }
    }

    /// Feed one telemetry event through the detector.
    ///
    /// Returns a containment request when a fresh breach occurred and the
    /// auto-response setting calls for immediate dispatch. Manual-mode
    /// breaches register the incident with pending actions and return None.
    pub fn analyze(
        &mut self,
        event: &TelemetryEvent,
        store: &mut IncidentStore,
    ) -> Option<ContainmentRequest> {
        if event.route != self.config.login_route || event.method != "POST" {
            return None;
        }

        let now = event.ts;
        let window = self.windows.window_mut(event.ip.clone());
        window.record(LoginAttempt {
            ts: now,
            user_id: event.user_id.clone(),
            auth_result: event.auth_result,
        });

        let failed: Vec<&LoginAttempt> = window
            .snapshot(now)
            .filter(|attempt| attempt.auth_result == Some(AuthResult::Fail))
            .collect();
        let failed_count = failed.len() as u64;
        let distinct_users: HashSet<&str> = failed
            .iter()
            .filter_map(|attempt| attempt.user_id.as_deref())
            .collect();
        let distinct_user_count = distinct_users.len() as u64;

        if failed_count < self.config.failed_login_threshold
            || distinct_user_count < self.config.distinct_user_threshold
        {
            return None;
        }

        let bucket = now / self.config.window_ms();
        let first_failed_ts = failed.first().map(|attempt| attempt.ts).unwrap_or(now);
        drop(failed);

        let incident_id = format!(
            "{}_{}_{}",
            AttackKind::CredentialStuffing.id_prefix(),
            event.ip,
            bucket
        );
        let key = IncidentKey {
            kind: AttackKind::CredentialStuffing,
            ip: event.ip.clone(),
            user_id: None,
            bucket,
        };
        if self.seen.contains(&key) {
            // Same attack, same bucket: idempotent re-trigger.
            if let Some(existing) = store.incident_mut(&incident_id) {
                existing.last_seen_at = now;
            }
            return None;
        }
        self.seen.insert(key);

        let detection_latency_ms = now.saturating_sub(first_failed_ts);
        store.metrics.detection_latency_ms = detection_latency_ms;

        let mode = if store.settings.auto_response {
            ActionMode::Auto
        } else {
            ActionMode::Manual
        };
        let auto = mode == ActionMode::Auto;

        let actions = vec![
            ContainmentAction::queued(
                ActionDirective::BlockIp {
                    ip: event.ip.clone(),
                    duration_ms: self.config.block_duration_ms,
                },
                mode,
            ),
            ContainmentAction::queued(
                ActionDirective::RateLimit {
                    ip: Some(event.ip.clone()),
                    route: self.config.login_route.clone(),
                    limit_rps: self.config.login_rate_limit_rps,
                },
                mode,
            ),
        ];

        let incident = Incident {
            id: incident_id.clone(),
            kind: AttackKind::CredentialStuffing,
            severity: Severity::Sev1,
            status: IncidentStatus::Active,
            ip: event.ip.clone(),
            user_id: None,
            tenant_id: event.tenant_id.clone(),
            route: self.config.login_route.clone(),
            started_at: first_failed_ts,
            last_seen_at: now,
            phases: Incident::onset_phases(first_failed_ts, now),
            reasons: vec![
                Reason {
                    rule: "failed_login_threshold".to_string(),
                    explanation: format!(
                        "{} failed login attempts from IP {} in {}s window",
                        failed_count, event.ip, self.config.window_seconds
                    ),
                    observed: failed_count,
                    threshold: self.config.failed_login_threshold,
                    window_sec: self.config.window_seconds,
                    delta_pct: delta_percent(failed_count, self.config.failed_login_threshold),
                },
                Reason {
                    rule: "distinct_user_threshold".to_string(),
                    explanation: format!("{} distinct user IDs targeted", distinct_user_count),
                    observed: distinct_user_count,
                    threshold: self.config.distinct_user_threshold,
                    window_sec: self.config.window_seconds,
                    delta_pct: delta_percent(
                        distinct_user_count,
                        self.config.distinct_user_threshold,
                    ),
                },
            ],
            actions,
            pending_actions: !auto,
        };

        info!(
            "credential stuffing detected from IP {}: {} failures, {} users",
            event.ip, failed_count, distinct_user_count
        );
        increment_counter!("detector_incidents", "type" => "credential_stuffing");

        let request = ContainmentRequest::from_incident(&incident);
        store.upsert_incident(incident);

        auto.then_some(request)
    }

    /// Drop all windows and dedup state.
    pub fn reset(&mut self) {
        self.windows.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_event(ts: u64, ip: &str, user: &str, result: AuthResult) -> TelemetryEvent {
        TelemetryEvent {
            ts,
            method: "POST".to_string(),
            route: "/auth/login".to_string(),
            status: if result == AuthResult::Fail { 401 } else { 200 },
            latency_ms: 5,
            ip: ip.to_string(),
            user_id: Some(user.to_string()),
            tenant_id: None,
            bytes_out: 32,
            auth_result: Some(result),
            service_target: Some(crate::core::event::ServiceTarget::Auth),
        }
    }

    fn setup() -> (CredentialStuffingDetector, IncidentStore) {
        let config = DetectionConfig::default();
        (
            CredentialStuffingDetector::new(config.clone()),
            IncidentStore::new(config.window_seconds),
        )
    }

    #[test]
    fn test_twelfth_failure_across_five_users_triggers_once() {
        let (mut detector, mut store) = setup();
        let base = 120_000u64; // bucket boundary, keeps the run in one bucket

        for i in 0..11u64 {
            let event = login_event(base + i * 100, "1.2.3.4", &format!("user{}", i % 6), AuthResult::Fail);
            assert!(detector.analyze(&event, &mut store).is_none());
            assert!(store.incidents().is_empty());
        }

        // 12th failure crosses both thresholds.
        let event = login_event(base + 1_100, "1.2.3.4", "user5", AuthResult::Fail);
        let request = detector.analyze(&event, &mut store);
        assert!(request.is_some());
        assert_eq!(store.incidents().len(), 1);
        assert!(store.incidents()[0].id.starts_with("cred_1.2.3.4_"));

        // 13th and beyond in the same bucket: no new incident, lastSeenAt moves.
        let event = login_event(base + 1_200, "1.2.3.4", "user1", AuthResult::Fail);
        assert!(detector.analyze(&event, &mut store).is_none());
        assert_eq!(store.incidents().len(), 1);
        assert_eq!(store.incidents()[0].last_seen_at, base + 1_200);
    }

    #[test]
    fn test_failures_against_too_few_users_do_not_trigger() {
        let (mut detector, mut store) = setup();
        for i in 0..20u64 {
            // 20 failures but only 4 distinct users.
            let event = login_event(120_000 + i * 100, "1.2.3.4", &format!("user{}", i % 4), AuthResult::Fail);
            assert!(detector.analyze(&event, &mut store).is_none());
        }
        assert!(store.incidents().is_empty());
    }

    #[test]
    fn test_successful_logins_are_not_counted_as_failures() {
        let (mut detector, mut store) = setup();
        for i in 0..30u64 {
            let event = login_event(120_000 + i * 100, "1.2.3.4", &format!("user{}", i % 8), AuthResult::Success);
            detector.analyze(&event, &mut store);
        }
        assert!(store.incidents().is_empty());
    }

    #[test]
    fn test_other_routes_are_ignored_entirely() {
        let (mut detector, mut store) = setup();
        let mut event = login_event(120_000, "1.2.3.4", "u1", AuthResult::Fail);
        event.route = "/data/export".to_string();
        assert!(detector.analyze(&event, &mut store).is_none());
        let mut event = login_event(120_100, "1.2.3.4", "u1", AuthResult::Fail);
        event.method = "GET".to_string();
        assert!(detector.analyze(&event, &mut store).is_none());
    }

    #[test]
    fn test_scenario_fifteen_failures_six_users() {
        let (mut detector, mut store) = setup();
        let base = 600_000u64;
        let mut request = None;
        for i in 0..15u64 {
            let event = login_event(base + i * 600, "1.2.3.4", &format!("user{}", i % 6), AuthResult::Fail);
            if let Some(r) = detector.analyze(&event, &mut store) {
                request = Some(r);
            }
        }

        assert_eq!(store.incidents().len(), 1);
        let incident = &store.incidents()[0];
        assert_eq!(incident.severity, Severity::Sev1);
        assert_eq!(incident.kind, crate::core::incident::AttackKind::CredentialStuffing);
        assert_eq!(incident.reasons.len(), 2);
        assert_eq!(incident.reasons[0].rule, "failed_login_threshold");
        assert_eq!(incident.reasons[1].rule, "distinct_user_threshold");
        assert!(!incident.pending_actions);

        let request = request.unwrap();
        assert_eq!(request.ip, "1.2.3.4");
        assert_eq!(request.route, "/auth/login");
    }

    #[test]
    fn test_manual_mode_queues_pending_actions() {
        let (mut detector, mut store) = setup();
        store.settings.auto_response = false;
        let base = 240_000u64;
        for i in 0..12u64 {
            let event = login_event(base + i * 100, "1.2.3.4", &format!("user{}", i % 6), AuthResult::Fail);
            assert!(detector.analyze(&event, &mut store).is_none());
        }

        let incident = &store.incidents()[0];
        assert!(incident.pending_actions);
        assert!(incident
            .actions
            .iter()
            .all(|a| a.result == crate::core::incident::ActionResult::Pending
                && a.mode == ActionMode::Manual));
    }

    #[test]
    fn test_detection_latency_recorded() {
        let (mut detector, mut store) = setup();
        let base = 360_000u64;
        for i in 0..12u64 {
            let event = login_event(base + i * 500, "1.2.3.4", &format!("user{}", i % 6), AuthResult::Fail);
            detector.analyze(&event, &mut store);
        }
        // First failed event at base, breach at base + 5_500.
        assert_eq!(store.metrics.detection_latency_ms, 5_500);
    }
}
