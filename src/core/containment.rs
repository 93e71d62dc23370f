//! Containment dispatcher: turns an incident's recommended actions into a
//! mitigation set and pushes it to the gateway's enforcement engine.
//!
//! The push is the pipeline's one async boundary. It gets a single attempt
//! with a bounded timeout; the outcome lands on the incident's action
//! results, and the incident moves to `contained` whether or not the push
//! succeeded ("attempted containment" semantics). Push failures are never
//! surfaced as server errors to operator endpoints.

use std::sync::Mutex;

use log::{info, warn};
use reqwest::Client;
use thiserror::Error;

use crate::core::enforcement::{IsolationRule, MitigationSet, RateLimitRule};
use crate::core::incident::{ActionResult, AttackKind, Incident, IncidentStatus, Phase, PhaseKind};
use crate::core::DetectorCore;
use crate::models::DetectionConfig;
use crate::utils::now_ms;

/// Errors from the enforcement push
#[derive(Debug, Error)]
pub enum ContainmentError {
    #[error("enforcement push failed: {0}")]
    Push(#[from] reqwest::Error),
    #[error("gateway responded {0}")]
    GatewayStatus(reqwest::StatusCode),
}

/// What the dispatcher needs to contain one incident
#[derive(Debug, Clone)]
pub struct ContainmentRequest {
    pub incident_id: String,
    pub kind: AttackKind,
    pub ip: String,
    pub user_id: Option<String>,
    pub route: String,
}

impl ContainmentRequest {
    /// Rebuild a request from a stored incident (manual approval path).
    pub fn from_incident(incident: &Incident) -> Self {
        Self {
            incident_id: incident.id.clone(),
            kind: incident.kind,
            ip: incident.ip.clone(),
            user_id: incident.user_id.clone(),
            route: incident.route.clone(),
        }
    }
}

/// Merge one incident's required change into a mitigation set, idempotently:
/// no duplicate blocked IPs, isolation rules, or rate-limit entries.
pub fn merge_containment(
    set: &mut MitigationSet,
    request: &ContainmentRequest,
    detection: &DetectionConfig,
) {
    match request.kind {
        AttackKind::CredentialStuffing => {
            set.blocked_ips.insert(request.ip.clone());

            let rule = RateLimitRule {
                key: Some(format!("{}:{}", request.ip, request.route)),
                ip: Some(request.ip.clone()),
                user_id: None,
                route: request.route.clone(),
                limit_rps: detection.login_rate_limit_rps,
            };
            if !set
                .rate_limits
                .iter()
                .any(|existing| existing.bucket_key() == rule.bucket_key())
            {
                set.rate_limits.push(rule);
            }
        }
        AttackKind::DataExfiltration => {
            let rule = IsolationRule {
                route: request.route.clone(),
                ip: Some(request.ip.clone()),
                user_id: request.user_id.clone(),
            };
            if !set.isolated_endpoints.contains(&rule) {
                set.isolated_endpoints.push(rule);
            }
        }
    }
}

/// HTTP client for pushing mitigation sets to the gateway
pub struct EnforcementClient {
    client: Client,
    base_url: String,
}

impl EnforcementClient {
    pub fn new(base_url: String, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Single-attempt push of the full mitigation set; timeout or non-2xx
    /// counts as failure, no retry.
    pub async fn apply(&self, mitigations: &MitigationSet) -> Result<(), ContainmentError> {
        let url = format!("{}/enforcement/apply", self.base_url);
        let response = self.client.post(&url).json(mitigations).send().await?;
        if !response.status().is_success() {
            return Err(ContainmentError::GatewayStatus(response.status()));
        }
        Ok(())
    }

    /// Best-effort wipe of all gateway rules (admin reset path).
    pub async fn clear(&self) -> bool {
        match self.apply(&MitigationSet::default()).await {
            Ok(()) => true,
            Err(err) => {
                warn!("enforcement clear failed: {}", err);
                false
            }
        }
    }
}

/// Push containment for one incident and record the outcome.
///
/// The core lock is held only to read and to write back state, never
/// across the network call.
pub async fn dispatch(
    core: &Mutex<DetectorCore>,
    client: &EnforcementClient,
    request: ContainmentRequest,
    detection: &DetectionConfig,
) {
    let merged = {
        let core = core.lock().unwrap();
        let mut set = core.store.mitigations.clone();
        merge_containment(&mut set, &request, detection);
        set
    };

    let started = now_ms();
    let outcome = client.apply(&merged).await;
    let response_latency_ms = now_ms().saturating_sub(started);

    let success = match outcome {
        Ok(()) => true,
        Err(err) => {
            warn!("containment push for {} failed: {}", request.incident_id, err);
            false
        }
    };

    let mut core = core.lock().unwrap();
    let applied_at = now_ms();
    if let Some(incident) = core.store.incident_mut(&request.incident_id) {
        for action in &mut incident.actions {
            action.at = Some(applied_at);
            action.result = if success {
                ActionResult::Success
            } else {
                ActionResult::Fail
            };
        }
        // Containment was attempted; the action results carry the verdict.
        incident.status = IncidentStatus::Contained;
        incident.phases.push(Phase {
            phase: PhaseKind::Isolated,
            at: applied_at,
        });
        incident.pending_actions = false;
    }
    core.store.metrics.response_latency_ms = response_latency_ms;
    core.store.update_mitigations(merged);

    info!(
        "containment for {} {} in {}ms",
        request.incident_id,
        if success { "applied" } else { "attempted (push failed)" },
        response_latency_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::incident::{ActionDirective, ActionMode, ContainmentAction, Severity};

    fn cred_request() -> ContainmentRequest {
        ContainmentRequest {
            incident_id: "cred_1.2.3.4_1".to_string(),
            kind: AttackKind::CredentialStuffing,
            ip: "1.2.3.4".to_string(),
            user_id: None,
            route: "/auth/login".to_string(),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let detection = DetectionConfig::default();
        let mut set = MitigationSet::default();
        merge_containment(&mut set, &cred_request(), &detection);
        merge_containment(&mut set, &cred_request(), &detection);

        assert_eq!(set.blocked_ips.len(), 1);
        assert_eq!(set.rate_limits.len(), 1);
        assert_eq!(set.rate_limits[0].limit_rps, 1.0);
        assert_eq!(set.rate_limits[0].route, "/auth/login");
    }

    #[test]
    fn test_merge_exfil_isolation() {
        let detection = DetectionConfig::default();
        let request = ContainmentRequest {
            incident_id: "exfil_5.6.7.8_u1_1".to_string(),
            kind: AttackKind::DataExfiltration,
            ip: "5.6.7.8".to_string(),
            user_id: Some("u1".to_string()),
            route: "/data/export".to_string(),
        };
        let mut set = MitigationSet::default();
        merge_containment(&mut set, &request, &detection);
        merge_containment(&mut set, &request, &detection);

        assert!(set.blocked_ips.is_empty());
        assert_eq!(set.isolated_endpoints.len(), 1);
        assert_eq!(set.isolated_endpoints[0].ip.as_deref(), Some("5.6.7.8"));
        assert_eq!(set.isolated_endpoints[0].user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_dispatch_marks_contained_even_when_push_fails() {
        let detection = DetectionConfig::default();
        let core = Mutex::new(DetectorCore::new(detection.clone()));
        {
            let mut locked = core.lock().unwrap();
            let mut incident = Incident::test_fixture("cred_1.2.3.4_1", Severity::Sev1);
            incident.actions.push(ContainmentAction::queued(
                ActionDirective::BlockIp {
                    ip: "1.2.3.4".to_string(),
                    duration_ms: 900_000,
                },
                ActionMode::Manual,
            ));
            incident.pending_actions = true;
            locked.store.upsert_incident(incident);
        }

        // Nothing listens here; the push fails fast.
        let client = EnforcementClient::new("http://127.0.0.1:9".to_string(), 200).unwrap();
        dispatch(&core, &client, cred_request(), &detection).await;

        let locked = core.lock().unwrap();
        let incident = locked.store.incident("cred_1.2.3.4_1").unwrap();
        assert_eq!(incident.status, IncidentStatus::Contained);
        assert!(!incident.pending_actions);
        assert_eq!(incident.actions[0].result, ActionResult::Fail);
        assert!(incident.actions[0].at.is_some());
        // The mitigation mirror still records what we attempted to apply.
        assert!(locked.store.mitigations.blocked_ips.contains("1.2.3.4"));
    }
}
