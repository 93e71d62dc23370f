//! Detector service entry point.
//!
//! Ingests gateway telemetry, runs the rule detectors, and pushes
//! containment to the gateway's enforcement engine.

use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;

use secops_pipeline::api::detector::{self, DetectorApiState};
use secops_pipeline::config::load_config;
use secops_pipeline::core::{DetectorCore, EnforcementClient};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = load_config().context("failed to load configuration")?;
    let detector_cfg = config.detector.clone();

    info!(
        "Starting detector on {}:{} (gateway at {})",
        detector_cfg.server.host, detector_cfg.server.port, detector_cfg.gateway_url
    );

    let enforcement = EnforcementClient::new(
        detector_cfg.gateway_url.clone(),
        detector_cfg.enforcement_timeout_ms,
    )
    .context("failed to build enforcement client")?;

    let state = web::Data::new(DetectorApiState {
        core: Arc::new(Mutex::new(DetectorCore::new(detector_cfg.detection.clone()))),
        enforcement: Arc::new(enforcement),
        detection: detector_cfg.detection.clone(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(detector::config)
    })
    .bind((detector_cfg.server.host.as_str(), detector_cfg.server.port))
    .with_context(|| {
        format!(
            "failed to bind {}:{}",
            detector_cfg.server.host, detector_cfg.server.port
        )
    })?
    .run()
    .await?;

    Ok(())
}
