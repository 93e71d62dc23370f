//! Gateway API: mock business endpoints behind the enforcement gate,
//! plus the enforcement control surface the detector pushes to.
//!
//! Every business request is gated first (block, isolate, rate-limit);
//! rejected requests produce no telemetry. Allowed requests emit one
//! telemetry event to the detector after the handler runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::core::enforcement::{EnforcementEngine, GateDecision, MitigationSet};
use crate::core::event::{service_target_for, AuthResult, TelemetryEvent};
use crate::core::telemetry::TelemetryClient;
use crate::utils::now_ms;

/// Demo password accepted for every account
const DEMO_PASSWORD: &str = "pass123";

/// Shared gateway state
pub struct GatewayState {
    pub enforcement: Arc<Mutex<EnforcementEngine>>,
    /// Session token -> resolved user id
    pub sessions: Arc<Mutex<HashMap<String, String>>>,
    pub telemetry: TelemetryClient,
}

/// Route registration for the gateway service
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/login", web::post().to(login))
        .route("/data/item/{id}", web::get().to(data_item))
        .route("/data/export", web::get().to(data_export))
        .route("/billing/pay", web::post().to(billing_pay))
        .route("/enforcement/apply", web::post().to(enforcement_apply))
        .route("/enforcement/state", web::get().to(enforcement_state))
        .route("/enforcement/clear", web::post().to(enforcement_clear))
        .route("/health", web::get().to(health));
}

/// Per-request context captured before the gate runs
struct RequestContext {
    started: u64,
    method: String,
    route: String,
    ip: String,
    user_id: Option<String>,
    tenant_id: Option<String>,
}

impl RequestContext {
    fn capture(state: &GatewayState, req: &HttpRequest) -> Self {
        Self {
            started: now_ms(),
            method: req.method().to_string(),
            route: req
                .match_pattern()
                .unwrap_or_else(|| req.path().to_string()),
            ip: client_ip(req),
            user_id: resolve_user(state, req),
            tenant_id: header_value(req, "x-tenant-id"),
        }
    }

    /// Run the enforcement gate; Some(response) means the request is over.
    fn gate(&self, state: &GatewayState) -> Option<HttpResponse> {
        let decision = state.enforcement.lock().unwrap().gate(
            &self.ip,
            self.user_id.as_deref(),
            &self.route,
            now_ms(),
        );
        match decision {
            GateDecision::Allow => None,
            GateDecision::BlockedIp => {
                info!("blocked IP rejected: {}", self.ip);
                Some(HttpResponse::Forbidden().json(json!({ "error": "IP blocked", "ip": self.ip })))
            }
            GateDecision::Isolated => {
                info!(
                    "isolated endpoint rejected: {} for ip={} user={:?}",
                    self.route, self.ip, self.user_id
                );
                Some(
                    HttpResponse::build(StatusCode::LOCKED)
                        .json(json!({ "error": "isolated", "route": self.route })),
                )
            }
            GateDecision::RateLimited => {
                info!("rate limited: {} for ip={}", self.route, self.ip);
                Some(
                    HttpResponse::TooManyRequests()
                        .json(json!({ "error": "rate limited", "route": self.route })),
                )
            }
        }
    }

    /// Emit one telemetry event for a completed (non-gated) request.
    fn finish(
        self,
        state: &GatewayState,
        status: u16,
        bytes_out: u64,
        auth_result: Option<AuthResult>,
        user_id: Option<String>,
    ) {
        let now = now_ms();
        state.telemetry.send(TelemetryEvent {
            ts: now,
            method: self.method,
            service_target: service_target_for(&self.route),
            route: self.route,
            status,
            latency_ms: now.saturating_sub(self.started),
            ip: self.ip,
            user_id: user_id.or(self.user_id),
            tenant_id: self.tenant_id,
            bytes_out,
            auth_result,
        });
    }
}

fn client_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = header_value(req, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Resolve the caller without rejecting: bearer session token first,
/// then the demo api-key scheme.
fn resolve_user(state: &GatewayState, req: &HttpRequest) -> Option<String> {
    if let Some(auth) = header_value(req, "authorization") {
        let token = auth.trim_start_matches("Bearer ").trim();
        if let Some(user) = state.sessions.lock().unwrap().get(token) {
            return Some(user.clone());
        }
    }
    header_value(req, "x-api-key")
        .map(|key| format!("apikey_{}", &key[..key.len().min(8)]))
}

fn require_auth(ctx: &RequestContext) -> Option<HttpResponse> {
    if ctx.user_id.is_some() {
        None
    } else {
        Some(
            HttpResponse::Unauthorized()
                .json(json!({ "ok": false, "error": "authentication required" })),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    user_id: String,
    password: String,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: String,
}

async fn login(
    state: web::Data<GatewayState>,
    req: HttpRequest,
    body: web::Json<LoginRequest>,
) -> impl Responder {
    let ctx = RequestContext::capture(&state, &req);
    if let Some(rejected) = ctx.gate(&state) {
        return rejected;
    }

    let user_id = body.user_id.clone();
    if body.password == DEMO_PASSWORD {
        let token = Uuid::new_v4().to_string();
        state
            .sessions
            .lock()
            .unwrap()
            .insert(token.clone(), user_id.clone());
        info!("login success: {}", user_id);

        let payload = json!({ "ok": true, "token": token });
        let bytes_out = payload.to_string().len() as u64;
        ctx.finish(&state, 200, bytes_out, Some(AuthResult::Success), Some(user_id));
        return HttpResponse::Ok().json(payload);
    }

    info!("login failed: {}", user_id);
    let payload = json!({ "ok": false, "error": "invalid credentials" });
    let bytes_out = payload.to_string().len() as u64;
    ctx.finish(&state, 401, bytes_out, Some(AuthResult::Fail), Some(user_id));
    HttpResponse::Unauthorized().json(payload)
}

async fn data_item(
    state: web::Data<GatewayState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let ctx = RequestContext::capture(&state, &req);
    if let Some(rejected) = ctx.gate(&state) {
        return rejected;
    }
    if let Some(rejected) = require_auth(&ctx) {
        ctx.finish(&state, 401, 0, None, None);
        return rejected;
    }

    let id = path.into_inner();
    let payload = json!({
        "ok": true,
        "item": {
            "id": id,
            "name": format!("Item {}", id),
            "description": format!("This is data item {}", id),
            "createdAt": Utc::now().to_rfc3339(),
            "metadata": { "version": 1, "category": "general" }
        }
    });
    let bytes_out = payload.to_string().len() as u64;
    ctx.finish(&state, 200, bytes_out, None, None);
    HttpResponse::Ok().json(payload)
}

async fn data_export(state: web::Data<GatewayState>, req: HttpRequest) -> impl Responder {
    let ctx = RequestContext::capture(&state, &req);
    if let Some(rejected) = ctx.gate(&state) {
        return rejected;
    }
    if let Some(rejected) = require_auth(&ctx) {
        ctx.finish(&state, 401, 0, None, None);
        return rejected;
    }

    let export_id = format!("exp_{}", Uuid::new_v4().simple());
    let num_rows = 1_000u32;
    let rows: Vec<serde_json::Value> = (1..=num_rows)
        .map(|i| {
            json!({
                "id": i,
                "email": format!("user{}@example.com", i),
                "name": format!("User {}", i),
                "ssn": format!("XXX-XX-{:04}", i % 10_000),
            })
        })
        .collect();
    // Nominal export size, 500 KB to 1 MB; this is what the exfiltration
    // detector accounts, not the literal response length.
    let size_bytes = 500_000 + now_ms() % 500_000;

    info!("export {}: {} rows, {} bytes", export_id, num_rows, size_bytes);
    ctx.finish(&state, 200, size_bytes, None, None);
    HttpResponse::Ok().json(json!({
        "ok": true,
        "exportId": export_id,
        "rows": rows,
        "sizeBytes": size_bytes
    }))
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    amount: Option<f64>,
    currency: Option<String>,
}

async fn billing_pay(
    state: web::Data<GatewayState>,
    req: HttpRequest,
    body: web::Json<PaymentRequest>,
) -> impl Responder {
    let ctx = RequestContext::capture(&state, &req);
    if let Some(rejected) = ctx.gate(&state) {
        return rejected;
    }
    if let Some(rejected) = require_auth(&ctx) {
        ctx.finish(&state, 401, 0, None, None);
        return rejected;
    }

    let receipt_id = format!("rcpt_{}", Uuid::new_v4().simple());
    let amount = body.amount.unwrap_or(99.99);
    let currency = body.currency.clone().unwrap_or_else(|| "USD".to_string());
    info!("payment processed: {} - {} {}", receipt_id, amount, currency);

    let payload = json!({
        "ok": true,
        "receiptId": receipt_id,
        "amount": amount,
        "currency": currency,
        "processedAt": Utc::now().to_rfc3339()
    });
    let bytes_out = payload.to_string().len() as u64;
    ctx.finish(&state, 200, bytes_out, None, None);
    HttpResponse::Ok().json(payload)
}

async fn enforcement_apply(
    state: web::Data<GatewayState>,
    body: web::Json<MitigationSet>,
) -> impl Responder {
    let mitigations = body.into_inner();
    let mut engine = state.enforcement.lock().unwrap();
    engine.apply(mitigations, now_ms());
    HttpResponse::Ok().json(json!({ "ok": true, "applied": true, "state": engine.state() }))
}

async fn enforcement_state(state: web::Data<GatewayState>) -> impl Responder {
    HttpResponse::Ok().json(state.enforcement.lock().unwrap().state())
}

async fn enforcement_clear(state: web::Data<GatewayState>) -> impl Responder {
    state.enforcement.lock().unwrap().clear();
    HttpResponse::Ok().json(json!({ "ok": true, "cleared": true }))
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        ok: true,
        service: "gateway",
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
