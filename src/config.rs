//! Application configuration (TOML) and station template definitions.
//!
//! Mirrors the teacher's flat, hand-written `Config` struct rather than
//! reaching for a layered config-builder crate: one `AppConfig` loaded once
//! at startup, grouped into the sections each subsystem actually reads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::ocpp::OcppVersion;
use crate::domain::station::SupervisionUrlDistribution;
use crate::support::errors::InfraError;

/// Top-level application configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supervisor: SupervisorConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            ui: UiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub async fn from_file(path: &Path) -> Result<Self, InfraError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| InfraError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| InfraError::Io(format!("parse {}: {e}", path.display())))
    }

    /// Load the config at `path`, falling back to defaults if the file does
    /// not exist (a fresh install should run, not fail to start).
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path).await {
            Ok(cfg) => cfg,
            Err(_) if !path.exists() => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Self::default()
            }
        }
    }
}

/// Worker-pool model selection (C12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolModel {
    Fixed,
    Dynamic,
    WorkerSet,
}

impl Default for WorkerPoolModel {
    fn default() -> Self {
        WorkerPoolModel::WorkerSet
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub worker_pool_model: WorkerPoolModel,
    /// Number of workers for the fixed-pool model.
    pub fixed_worker_count: usize,
    /// Stations per worker for the worker-set model.
    pub worker_set_capacity: usize,
    /// Ceiling on worker count for the dynamic-pool model.
    pub dynamic_max_workers: usize,
    /// Queue depth above which the dynamic pool spawns another worker.
    pub dynamic_spawn_threshold: usize,
    /// An idle worker (dynamic pool) retires after this many seconds.
    pub dynamic_idle_ttl_secs: u64,
    pub ping_interval_secs: u64,
    pub reconnect_max_secs: u64,
    pub action_timeout_secs: u64,
    pub auth_cache_lifetime_secs: u64,
    pub auth_cache_capacity: usize,
    pub offline_authorization_enabled: bool,
    pub local_pre_authorize: bool,
    /// Directory holding station template JSON files.
    pub templates_dir: PathBuf,
    /// Directory used by the certificate manager and per-station config persistence.
    pub data_dir: PathBuf,
    /// Address the Prometheus exporter listens on.
    pub metrics_bind_addr: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_pool_model: WorkerPoolModel::default(),
            fixed_worker_count: 4,
            worker_set_capacity: 50,
            dynamic_max_workers: 16,
            dynamic_spawn_threshold: 32,
            dynamic_idle_ttl_secs: 300,
            ping_interval_secs: 60,
            reconnect_max_secs: 60,
            action_timeout_secs: 30,
            auth_cache_lifetime_secs: 3600,
            auth_cache_capacity: 1024,
            offline_authorization_enabled: false,
            local_pre_authorize: true,
            templates_dir: PathBuf::from("templates"),
            data_dir: PathBuf::from("data"),
            metrics_bind_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_addr: String,
    pub basic_auth: Option<BasicAuthConfig>,
    /// Token-bucket refill rate, requests per second per IP.
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
    pub gzip_threshold_bytes: usize,
    pub max_stations_per_add: usize,
    /// Overall timeout for collecting a broadcast's per-station responses.
    pub broadcast_timeout_secs: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9001".to_string(),
            basic_auth: None,
            rate_limit_per_second: 20,
            rate_limit_burst: 40,
            max_body_bytes: 1024 * 1024,
            gzip_threshold_bytes: 4096,
            max_stations_per_add: 500,
            broadcast_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Resolve the default config file location, following platform convention
/// (XDG on Linux, Application Support on macOS, etc.) rather than hardcoding
/// a path.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-simulator")
        .join("config.toml")
}

// ── Station templates (§6) ──────────────────────────────────────────

/// A station template as loaded from a template JSON file. One template
/// plus a fleet index produces one simulated station (`station_hash_id`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct StationTemplate {
    #[validate(length(min = 1, message = "baseName must not be empty"))]
    pub base_name: String,
    #[validate(custom(function = "validate_supervision_urls"))]
    pub supervision_urls: Vec<String>,
    pub supervision_url_distribution: SupervisionUrlDistribution,
    /// Spelled the way §6 spells it, `"1.6"` / `"2.0.1"` — parsed with
    /// `OcppVersion::from_template_str`, not `serde`'s enum tagging, since
    /// the wire spelling doesn't match the Rust variant names.
    pub ocpp_version: String,
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub firmware_version: String,
    pub serial_number: Option<String>,
    #[validate(range(min = 1, max = 64, message = "numberOfConnectors must be between 1 and 64"))]
    pub number_of_connectors: u32,
    /// Randomize connector count within `[min, max]` instead of using
    /// `number_of_connectors` verbatim.
    pub random_connectors: Option<(u32, u32)>,
    #[validate(nested)]
    pub connectors: Vec<ConnectorTemplate>,
    #[validate(nested)]
    pub automatic_transaction_generator: Option<AtgTemplate>,
    pub configuration: Vec<ConfigurationKeyTemplate>,
    pub id_tags_file: Option<PathBuf>,
    pub amperage_limitation_ocpp_key: Option<String>,
    pub amperage_limitation_unit: Option<String>,
    pub power: Option<f64>,
    pub power_unit: Option<String>,
    pub voltage_out: Option<f64>,
}

/// `supervisionUrls` must be non-empty and every entry a websocket URL — a
/// station with no reachable CSMS or an `http://` typo should fail template
/// validation, not surface as a mysterious connect failure later.
fn validate_supervision_urls(urls: &[String]) -> Result<(), ValidationError> {
    if urls.is_empty() {
        return Err(ValidationError::new("supervision_urls_empty")
            .with_message("supervisionUrls must contain at least one URL".into()));
    }
    for url in urls {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ValidationError::new("supervision_url_scheme")
                .with_message(format!("supervisionUrls entries must be ws:// or wss://, got {url}").into()));
        }
    }
    Ok(())
}

impl Default for StationTemplate {
    fn default() -> Self {
        Self {
            base_name: "CS".to_string(),
            supervision_urls: Vec::new(),
            supervision_url_distribution: SupervisionUrlDistribution::RoundRobin,
            ocpp_version: "1.6".to_string(),
            charge_point_vendor: "Simulated Vendor".to_string(),
            charge_point_model: "Simulated Model".to_string(),
            firmware_version: "1.0.0".to_string(),
            serial_number: None,
            number_of_connectors: 1,
            random_connectors: None,
            connectors: Vec::new(),
            automatic_transaction_generator: None,
            configuration: Vec::new(),
            id_tags_file: None,
            amperage_limitation_ocpp_key: None,
            amperage_limitation_unit: None,
            power: None,
            power_unit: None,
            voltage_out: None,
        }
    }
}

impl StationTemplate {
    pub fn resolved_ocpp_version(&self) -> Option<OcppVersion> {
        OcppVersion::from_template_str(&self.ocpp_version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorTemplate {
    #[serde(rename = "meterValueSampleInterval")]
    #[validate(range(min = 1, message = "meterValueSampleInterval must be at least 1 second"))]
    pub meter_value_sample_interval_secs: u32,
    #[serde(rename = "clockAlignedDataInterval")]
    pub clock_aligned_data_interval_secs: u32,
}

impl Default for ConnectorTemplate {
    fn default() -> Self {
        Self {
            meter_value_sample_interval_secs: 60,
            clock_aligned_data_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct AtgTemplate {
    pub enable: bool,
    #[serde(rename = "minDelayBetweenTwoTransactions")]
    pub min_delay_secs: u64,
    #[serde(rename = "maxDelayBetweenTwoTransactions")]
    pub max_delay_secs: u64,
    #[serde(rename = "minDuration")]
    pub min_duration_secs: u64,
    #[serde(rename = "maxDuration")]
    pub max_duration_secs: u64,
    #[validate(range(min = 0.0, max = 1.0, message = "probabilityOfStart must be between 0 and 1"))]
    pub probability_of_start: f64,
    pub stop_after_hours: Option<f64>,
    pub require_authorize: bool,
}

impl Default for AtgTemplate {
    fn default() -> Self {
        Self {
            enable: false,
            min_delay_secs: 30,
            max_delay_secs: 90,
            min_duration_secs: 300,
            max_duration_secs: 1800,
            probability_of_start: 1.0,
            stop_after_hours: None,
            require_authorize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationKeyTemplate {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub reboot_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.ui.bind_addr, cfg.ui.bind_addr);
    }

    #[test]
    fn station_template_parses_from_json() {
        let json = serde_json::json!({
            "baseName": "CS",
            "supervisionUrls": ["ws://localhost:9000/ocpp"],
            "ocppVersion": "1.6",
            "numberOfConnectors": 2,
        });
        let template: StationTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(template.number_of_connectors, 2);
        assert_eq!(template.supervision_urls.len(), 1);
        assert_eq!(template.resolved_ocpp_version(), Some(OcppVersion::V16));
        assert!(template.validate().is_ok());
    }

    #[test]
    fn station_template_rejects_non_websocket_supervision_url() {
        let json = serde_json::json!({
            "baseName": "CS",
            "supervisionUrls": ["http://localhost:9000/ocpp"],
            "ocppVersion": "1.6",
            "numberOfConnectors": 2,
        });
        let template: StationTemplate = serde_json::from_value(json).unwrap();
        assert!(template.validate().is_err());
    }

    #[test]
    fn station_template_rejects_empty_base_name() {
        let json = serde_json::json!({
            "baseName": "",
            "supervisionUrls": ["ws://localhost:9000/ocpp"],
        });
        let template: StationTemplate = serde_json::from_value(json).unwrap();
        assert!(template.validate().is_err());
    }
}
