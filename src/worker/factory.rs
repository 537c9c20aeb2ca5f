//! Builds one station (domain aggregate + its FSM dependencies) from a
//! template and fleet index. Shared by all three worker-pool models so a
//! station looks identical regardless of which pool hosts it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::application::atg::AtgConfig;
use crate::application::station::StationDeps;
use crate::config::{AtgTemplate, StationTemplate};
use crate::domain::auth::{AuthCache, AuthPipeline, LocalAuthList};
use crate::domain::certificate::CertificateManager;
use crate::domain::configuration::{ConfigurationKey, ConfigurationStore};
use crate::domain::station::{Station, SupervisionUrls};
use crate::support::ids::station_hash_id;

/// Ambient settings the factory needs but that live on `SupervisorConfig`,
/// passed down rather than re-read from a config file per station.
#[derive(Clone)]
pub struct FactorySettings {
    pub ping_interval: std::time::Duration,
    pub reconnect_max: std::time::Duration,
    pub action_timeout: std::time::Duration,
    pub auth_cache_lifetime_secs: u64,
    pub auth_cache_capacity: usize,
    pub offline_authorization_enabled: bool,
    pub local_pre_authorize: bool,
    pub data_dir: std::path::PathBuf,
}

/// Build a `Station` aggregate and the `StationDeps` its FSM needs to run,
/// from a template plus fleet index. `certificates` is shared across every
/// station in the process (the certificate manager keys its on-disk layout
/// by station hash id internally). Returns the same `Arc<AsyncMutex<Station>>`
/// that ends up on `StationDeps::station`, so callers that only need to read
/// station state (e.g. a worker's `list()`) don't have to go through the FSM.
pub async fn build_station(
    template: &StationTemplate,
    index: u32,
    settings: &FactorySettings,
    certificates: Arc<CertificateManager>,
) -> (Arc<AsyncMutex<Station>>, StationDeps) {
    let hash_id = station_hash_id(&template.base_name, index);
    let ocpp_version = template
        .resolved_ocpp_version()
        .unwrap_or(crate::domain::ocpp::OcppVersion::V16);

    let supervision_urls = SupervisionUrls::new(
        template.supervision_urls.clone(),
        template.supervision_url_distribution,
    );

    let connector_count = match template.random_connectors {
        Some((min, max)) if max >= min => {
            let span = (max - min + 1).max(1);
            min + (rand::random::<u32>() % span)
        }
        _ => template.number_of_connectors.max(1),
    };

    let mut station = Station::new(
        hash_id.clone(),
        hash_id.clone(),
        ocpp_version,
        template.charge_point_vendor.clone(),
        template.charge_point_model.clone(),
        template.firmware_version.clone(),
        supervision_urls,
        connector_count,
    );
    station.serial_number = template.serial_number.clone();
    station.amperage_limitation_key = template.amperage_limitation_ocpp_key.clone();

    for (id, connector_template) in (1..=connector_count).zip(template.connectors.iter().cycle().take(connector_count as usize)) {
        if let Some(connector) = station.connector_mut(id) {
            connector.meter_value_sample_interval = connector_template.meter_value_sample_interval_secs;
            connector.clock_aligned_data_interval = connector_template.clock_aligned_data_interval_secs;
        }
    }

    let config_path = settings.data_dir.join(format!("{hash_id}.config.json"));
    let seeded: Vec<ConfigurationKey> = template
        .configuration
        .iter()
        .map(|k| {
            ConfigurationKey::new(k.key.clone(), k.value.clone())
                .readonly(k.readonly)
        })
        .collect();
    let config = ConfigurationStore::with_defaults(Some(config_path), seeded);

    let id_tags = load_id_tags(template).await;
    let atg = build_atg_map(template, connector_count, &id_tags);

    let station = Arc::new(AsyncMutex::new(station));

    let deps = StationDeps {
        hash_id: hash_id.clone(),
        station: station.clone(),
        config: Arc::new(AsyncMutex::new(config)),
        auth_cache: Arc::new(AuthCache::new(settings.auth_cache_capacity)),
        local_list: Arc::new(LocalAuthList::new()),
        auth_pipeline: Arc::new(AuthPipeline::new(
            settings.offline_authorization_enabled,
            settings.local_pre_authorize,
        )),
        certificates,
        ping_interval: settings.ping_interval,
        reconnect_max: settings.reconnect_max,
        action_timeout: settings.action_timeout,
        auth_cache_lifetime_secs: settings.auth_cache_lifetime_secs,
        atg,
    };

    (station, deps)
}

fn build_atg_map(
    template: &StationTemplate,
    connector_count: u32,
    id_tags: &[String],
) -> HashMap<u32, AtgConfig> {
    let mut map = HashMap::new();
    let Some(atg) = template.automatic_transaction_generator.as_ref() else {
        return map;
    };
    if !atg.enable {
        return map;
    }
    for id in 1..=connector_count {
        map.insert(id, atg_config(atg, id_tags));
    }
    map
}

fn atg_config(atg: &AtgTemplate, id_tags: &[String]) -> AtgConfig {
    AtgConfig {
        min_delay: std::time::Duration::from_secs(atg.min_delay_secs),
        max_delay: std::time::Duration::from_secs(atg.max_delay_secs),
        min_duration: std::time::Duration::from_secs(atg.min_duration_secs),
        max_duration: std::time::Duration::from_secs(atg.max_duration_secs),
        probability_of_start: atg.probability_of_start,
        stop_after: atg
            .stop_after_hours
            .map(|hours| std::time::Duration::from_secs_f64(hours * 3600.0)),
        id_tags: id_tags.to_vec(),
    }
}

async fn load_id_tags(template: &StationTemplate) -> Vec<String> {
    if let Some(path) = template.id_tags_file.as_ref() {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let tags: Vec<String> = contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if !tags.is_empty() {
                    return tags;
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read id-tags file, using default tags");
            }
        }
    }
    vec!["TEST_TAG_1".to_string(), "TEST_TAG_2".to_string()]
}
