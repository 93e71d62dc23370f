//! Gateway service entry point.
//!
//! Fronts the mock business APIs behind the enforcement gate, emits
//! telemetry to the detector, and exposes the enforcement control
//! endpoints the detector pushes to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;

use secops_pipeline::api::gateway::{self, GatewayState};
use secops_pipeline::config::load_config;
use secops_pipeline::core::{EnforcementEngine, TelemetryClient};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = load_config().context("failed to load configuration")?;
    let gateway_cfg = config.gateway.clone();

    info!(
        "Starting gateway on {}:{} (detector at {})",
        gateway_cfg.server.host, gateway_cfg.server.port, gateway_cfg.detector_url
    );

    let telemetry = TelemetryClient::new(&gateway_cfg.detector_url, gateway_cfg.telemetry_timeout_ms)
        .context("failed to build telemetry client")?;
    let state = web::Data::new(GatewayState {
        enforcement: Arc::new(Mutex::new(EnforcementEngine::new())),
        sessions: Arc::new(Mutex::new(HashMap::new())),
        telemetry,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(gateway::config)
    })
    .bind((gateway_cfg.server.host.as_str(), gateway_cfg.server.port))
    .with_context(|| {
        format!(
            "failed to bind {}:{}",
            gateway_cfg.server.host, gateway_cfg.server.port
        )
    })?
    .run()
    .await?;

    Ok(())
}
