//! Configuration management for the security operations pipeline.
//!
//! This module handles loading application configuration from an optional
//! TOML file layered under environment variables, with built-in defaults
//! matching the demo deployment (gateway on :3000, detector on :4000).

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from file (if present) and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .set_default("gateway.server.host", "127.0.0.1")?
        .set_default("gateway.server.port", 3000)?
        .set_default("gateway.detector_url", "http://127.0.0.1:4000")?
        .set_default("gateway.telemetry_timeout_ms", 2000)?
        .set_default("detector.server.host", "127.0.0.1")?
        .set_default("detector.server.port", 4000)?
        .set_default("detector.gateway_url", "http://127.0.0.1:3000")?
        .set_default("detector.enforcement_timeout_ms", 5000)?
        .set_default("detector.detection.window_seconds", 60)?
        .set_default("detector.detection.failed_login_threshold", 12)?
        .set_default("detector.detection.distinct_user_threshold", 5)?
        .set_default("detector.detection.export_call_threshold", 30)?
        .set_default("detector.detection.bytes_out_threshold", 20 * 1024 * 1024)?
        .set_default("detector.detection.login_route", "/auth/login")?
        .set_default("detector.detection.export_route", "/data/export")?
        .set_default("detector.detection.login_rate_limit_rps", 1.0)?
        .set_default("detector.detection.block_duration_ms", 15 * 60 * 1000)?
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detection_thresholds() {
        let config = load_config().unwrap();
        assert_eq!(config.detector.detection.failed_login_threshold, 12);
        assert_eq!(config.detector.detection.distinct_user_threshold, 5);
        assert_eq!(config.detector.detection.export_call_threshold, 30);
        assert_eq!(config.detector.detection.bytes_out_threshold, 20 * 1024 * 1024);
        assert_eq!(config.detector.detection.window_ms(), 60_000);
    }
}
