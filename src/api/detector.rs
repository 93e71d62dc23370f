//! Detector API: telemetry ingest plus the operator surface.
//!
//! Ingest runs both rule detectors under the core lock, then dispatches
//! any auto-mode containment on detached tasks so the telemetry response
//! never waits on the gateway. Operator endpoints read snapshots, flip
//! the auto-response setting, approve manual containment, and reset.

use std::sync::{Arc, Mutex};

use actix_web::{web, HttpResponse, Responder};
use log::info;
use metrics::increment_counter;
use serde::Deserialize;
use serde_json::json;

use crate::core::containment::{dispatch, ContainmentRequest, EnforcementClient};
use crate::core::{DetectorCore, TelemetryEvent};
use crate::models::DetectionConfig;

/// Shared detector state
pub struct DetectorApiState {
    pub core: Arc<Mutex<DetectorCore>>,
    pub enforcement: Arc<EnforcementClient>,
    pub detection: DetectionConfig,
}

/// Route registration for the detector service
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/telemetry", web::post().to(ingest_telemetry))
        .route("/state", web::get().to(state_snapshot))
        .route("/metrics.json", web::get().to(pipeline_metrics))
        .route("/settings", web::get().to(get_settings))
        .route("/settings", web::post().to(update_settings))
        .route("/incidents", web::get().to(list_incidents))
        .route("/incidents/{id}", web::get().to(get_incident))
        .route("/incidents/{id}/approve", web::post().to(approve_incident))
        .route("/admin/reset", web::post().to(admin_reset))
        .route("/health", web::get().to(health));
}

async fn ingest_telemetry(
    state: web::Data<DetectorApiState>,
    body: web::Json<TelemetryEvent>,
) -> impl Responder {
    let event = body.into_inner();
    if event.ts == 0 {
        return HttpResponse::BadRequest()
            .json(json!({ "ok": false, "error": "invalid telemetry event" }));
    }
    increment_counter!("detector_telemetry_events");

    let requests = state.core.lock().unwrap().ingest(event);

    // Auto-mode containment runs off the request path.
    for request in requests {
        let core = Arc::clone(&state.core);
        let enforcement = Arc::clone(&state.enforcement);
        let detection = state.detection.clone();
        tokio::spawn(async move {
            dispatch(&core, &enforcement, request, &detection).await;
        });
    }

    HttpResponse::Ok().json(json!({ "ok": true, "received": true }))
}

async fn state_snapshot(state: web::Data<DetectorApiState>) -> impl Responder {
    let snapshot = state.core.lock().unwrap().store.snapshot();
    HttpResponse::Ok().json(snapshot)
}

async fn pipeline_metrics(state: web::Data<DetectorApiState>) -> impl Responder {
    let metrics = state.core.lock().unwrap().store.metrics.clone();
    HttpResponse::Ok().json(metrics)
}

async fn get_settings(state: web::Data<DetectorApiState>) -> impl Responder {
    let settings = state.core.lock().unwrap().store.settings.clone();
    HttpResponse::Ok().json(settings)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsUpdate {
    auto_response: Option<bool>,
}

async fn update_settings(
    state: web::Data<DetectorApiState>,
    body: web::Json<SettingsUpdate>,
) -> impl Responder {
    let mut core = state.core.lock().unwrap();
    if let Some(auto_response) = body.auto_response {
        core.store.settings.auto_response = auto_response;
        info!("auto response set to {}", auto_response);
    }
    HttpResponse::Ok().json(core.store.settings.clone())
}

async fn list_incidents(state: web::Data<DetectorApiState>) -> impl Responder {
    let incidents = state.core.lock().unwrap().store.incidents().to_vec();
    HttpResponse::Ok().json(json!({ "incidents": incidents }))
}

async fn get_incident(
    state: web::Data<DetectorApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    let core = state.core.lock().unwrap();
    match core.store.incident(&id) {
        Some(incident) => HttpResponse::Ok().json(incident),
        None => HttpResponse::NotFound().json(json!({ "ok": false, "error": "Not found" })),
    }
}

/// Manual approval: dispatch the incident's queued actions now.
async fn approve_incident(
    state: web::Data<DetectorApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    // Validate and build the request under the lock, then release it
    // for the enforcement push.
    let request = {
        let core = state.core.lock().unwrap();
        let Some(incident) = core.store.incident(&id) else {
            return HttpResponse::NotFound().json(json!({ "ok": false, "error": "Not found" }));
        };
        if !incident.pending_actions {
            return HttpResponse::BadRequest()
                .json(json!({ "ok": false, "error": "No pending actions" }));
        }
        ContainmentRequest::from_incident(incident)
    };

    info!("manual containment approved for {}", id);
    dispatch(&state.core, &state.enforcement, request, &state.detection).await;

    let core = state.core.lock().unwrap();
    match core.store.incident(&id) {
        Some(incident) => {
            HttpResponse::Ok().json(json!({ "ok": true, "approved": true, "incident": incident }))
        }
        None => HttpResponse::NotFound().json(json!({ "ok": false, "error": "Not found" })),
    }
}

async fn admin_reset(state: web::Data<DetectorApiState>) -> impl Responder {
    state.core.lock().unwrap().reset();
    // Best effort; a dead gateway does not fail the reset.
    state.enforcement.clear().await;
    info!("detector state reset");
    HttpResponse::Ok().json(json!({ "ok": true, "reset": true }))
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "ok": true,
        "service": "detector",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
