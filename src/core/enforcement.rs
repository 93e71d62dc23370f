//! Enforcement engine for the gateway.
//!
//! Holds the current mitigation set pushed down by the detector and gates
//! every inbound request in fixed order: blocked IP, then endpoint
//! isolation, then token-bucket rate limits. Only the enforcement apply
//! operation mutates this state; the request gate reads it and ticks the
//! buckets.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use metrics::increment_counter;
use serde::{Deserialize, Serialize};

/// Isolation rule: absent ip/user means "isolate for everyone"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationRule {
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Rate-limit rule; `route` may be `"*"` to match any route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Display key carried on the wire; bucket identity is structural
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub route: String,
    pub limit_rps: f64,
}

/// Structured token-bucket identity; avoids delimiter collisions that a
/// concatenated `ip:user:route` string key would allow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub route: String,
}

impl RateLimitRule {
    pub fn bucket_key(&self) -> RateLimitKey {
        RateLimitKey {
            ip: self.ip.clone(),
            user_id: self.user_id.clone(),
            route: self.route.clone(),
        }
    }

    fn matches(&self, ip: &str, user_id: Option<&str>, route: &str) -> bool {
        let ip_match = self.ip.as_deref().map_or(true, |rule_ip| rule_ip == ip);
        let user_match = self
            .user_id
            .as_deref()
            .map_or(true, |rule_user| Some(rule_user) == user_id);
        let route_match = self.route == route || self.route == "*";
        ip_match && user_match && route_match
    }
}

impl IsolationRule {
    fn matches(&self, ip: &str, user_id: Option<&str>, route: &str) -> bool {
        if self.route != route {
            return false;
        }
        if self.ip.is_none() && self.user_id.is_none() {
            return true;
        }
        if self.ip.as_deref() == Some(ip) {
            return true;
        }
        self.user_id.as_deref().is_some() && self.user_id.as_deref() == user_id
    }
}

/// The gateway's current containment rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationSet {
    #[serde(rename = "blockedIPs", default)]
    pub blocked_ips: BTreeSet<String>,
    #[serde(default)]
    pub isolated_endpoints: Vec<IsolationRule>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRule>,
}

/// Continuous-refill rate-limiting state for one rate-limit key
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    limit_rps: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    pub fn new(limit_rps: f64, now_ms: u64) -> Self {
        Self {
            tokens: limit_rps,
            limit_rps,
            last_refill_ms: now_ms,
        }
    }

    /// Refill by elapsed time, then atomically test-and-decrement.
    pub fn try_consume(&mut self, now_ms: u64) -> bool {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * self.limit_rps).min(self.limit_rps);
        self.last_refill_ms = now_ms;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Outcome of gating one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Source IP is in the blocked set (terminal, checked first)
    BlockedIp,
    /// An isolation rule matched the route for this caller
    Isolated,
    /// The first matching rate-limit rule had no token left
    RateLimited,
}

/// Gateway-resident enforcement state: mitigation set plus token buckets
#[derive(Debug, Default)]
pub struct EnforcementEngine {
    mitigations: MitigationSet,
    buckets: HashMap<RateLimitKey, TokenBucket>,
}

impl EnforcementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mitigation set.
    ///
    /// Replacing the rate-limit list discards and rebuilds every token
    /// bucket; partial balances never carry across updates.
    pub fn apply(&mut self, mitigations: MitigationSet, now_ms: u64) {
        self.buckets.clear();
        for rule in &mitigations.rate_limits {
            self.buckets
                .insert(rule.bucket_key(), TokenBucket::new(rule.limit_rps, now_ms));
        }
        debug!(
            "enforcement applied: {} blocked IPs, {} isolations, {} rate limits",
            mitigations.blocked_ips.len(),
            mitigations.isolated_endpoints.len(),
            mitigations.rate_limits.len()
        );
        self.mitigations = mitigations;
    }

    /// Drop every containment rule and bucket.
    pub fn clear(&mut self) {
        self.mitigations = MitigationSet::default();
        self.buckets.clear();
    }

    pub fn state(&self) -> &MitigationSet {
        &self.mitigations
    }

    /// Gate one inbound request. Evaluation order is fixed:
    /// block, then isolate, then rate-limit; the first rejection wins.
    pub fn gate(&mut self, ip: &str, user_id: Option<&str>, route: &str, now_ms: u64) -> GateDecision {
        if self.mitigations.blocked_ips.contains(ip) {
            increment_counter!("gateway_requests_rejected", "reason" => "blocked_ip");
            return GateDecision::BlockedIp;
        }

        if self
            .mitigations
            .isolated_endpoints
            .iter()
            .any(|rule| rule.matches(ip, user_id, route))
        {
            increment_counter!("gateway_requests_rejected", "reason" => "isolated");
            return GateDecision::Isolated;
        }

        // Rules are not cumulative: only the first match is applied.
        let matched = self
            .mitigations
            .rate_limits
            .iter()
            .find(|rule| rule.matches(ip, user_id, route));
        if let Some(rule) = matched {
            let bucket = self
                .buckets
                .entry(rule.bucket_key())
                .or_insert_with(|| TokenBucket::new(rule.limit_rps, now_ms));
            if !bucket.try_consume(now_ms) {
                increment_counter!("gateway_requests_rejected", "reason" => "rate_limited");
                return GateDecision::RateLimited;
            }
        }

        GateDecision::Allow
    }
}
