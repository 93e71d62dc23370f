use serde::{Deserialize, Serialize};

/// Server bind configuration, shared by both services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Gateway service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway bind address
    pub server: ServerConfig,
    /// Base URL of the detector service (telemetry sink)
    pub detector_url: String,
    /// Timeout for fire-and-forget telemetry pushes (ms)
    pub telemetry_timeout_ms: u64,
}

/// Detector service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detector bind address
    pub server: ServerConfig,
    /// Base URL of the gateway service (enforcement sink)
    pub gateway_url: String,
    /// Timeout for enforcement apply pushes (ms)
    pub enforcement_timeout_ms: u64,
    /// Detection rule configuration
    pub detection: DetectionConfig,
}

/// Thresholds and windows for the rule detectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Sliding window size in seconds
    pub window_seconds: u64,
    /// Failed logins per IP required to flag credential stuffing
    pub failed_login_threshold: u64,
    /// Distinct targeted user ids required to flag credential stuffing
    pub distinct_user_threshold: u64,
    /// Export calls per (ip, user) required to flag data exfiltration
    pub export_call_threshold: u64,
    /// Exported bytes per (ip, user) required to flag data exfiltration
    pub bytes_out_threshold: u64,
    /// Login route watched for credential stuffing
    pub login_route: String,
    /// Export route watched for data exfiltration
    pub export_route: String,
    /// Rate limit (requests per second) pushed for a stuffed login route
    pub login_rate_limit_rps: f64,
    /// How long a blocked IP stays blocked (ms), carried on the action
    pub block_duration_ms: u64,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway configuration
    pub gateway: GatewayConfig,
    /// Detector configuration
    pub detector: DetectorConfig,
}

impl DetectionConfig {
    /// Sliding window size in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_seconds * 1000
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            failed_login_threshold: 12,
            distinct_user_threshold: 5,
            export_call_threshold: 30,
            bytes_out_threshold: 20 * 1024 * 1024,
            login_route: "/auth/login".to_string(),
            export_route: "/data/export".to_string(),
            login_rate_limit_rps: 1.0,
            block_duration_ms: 15 * 60 * 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                server: ServerConfig {
                    host: "127.0.0.1".to_string(),
                    port: 3000,
                },
                detector_url: "http://127.0.0.1:4000".to_string(),
                telemetry_timeout_ms: 2_000,
            },
            detector: DetectorConfig {
                server: ServerConfig {
                    host: "127.0.0.1".to_string(),
                    port: 4000,
                },
                gateway_url: "http://127.0.0.1:3000".to_string(),
                enforcement_timeout_ms: 5_000,
                detection: DetectionConfig::default(),
            },
        }
    }
}
