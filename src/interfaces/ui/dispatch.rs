//! Procedure dispatch: turns a parsed `Procedure` into `WorkerPool` calls and
//! a `ResponseBody` (§4.13).
//!
//! `hashIds`-addressed procedures run one call per target concurrently and
//! aggregate into `{hashIdsSucceeded, hashIdsFailed, responsesFailed}` — see
//! DESIGN.md for why this is direct per-station addressing rather than a C14
//! broadcast fan-out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::StationTemplate;

use super::dto::{FailedStation, Procedure, ResponseBody};
use super::UiState;

/// Aggregate the outcome of calling `$call` against every hash id in
/// `$hash_ids`, each wrapped in its own per-target timeout so one slow or
/// stuck station never blocks the others' results.
macro_rules! aggregate {
    ($state:expr, $hash_ids:expr, |$pool:ident, $hid:ident| $call:expr) => {{
        let per_target_timeout = Duration::from_secs($state.config.broadcast_timeout_secs.max(1));
        let aggregation_start = std::time::Instant::now();
        let results = futures_util::future::join_all($hash_ids.iter().cloned().map(|$hid| {
            let $pool = $state.pool.clone();
            async move {
                let outcome = match tokio::time::timeout(per_target_timeout, $call).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("request timed out".to_string()),
                };
                ($hid, outcome)
            }
        }))
        .await;
        metrics::histogram!("ui_broadcast_aggregation_latency_seconds").record(aggregation_start.elapsed().as_secs_f64());

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (hash_id, outcome) in results {
            match outcome {
                None => succeeded.push(hash_id),
                Some(error_message) => failed.push(FailedStation { hash_id, error_message }),
            }
        }
        ResponseBody::aggregated(succeeded, failed)
    }};
}

pub async fn execute(state: &UiState, procedure: Procedure) -> ResponseBody {
    metrics::counter!("ui_commands_dispatched_total", "procedure" => procedure.name()).increment(1);
    match procedure {
        Procedure::ListChargingStations => {
            let summaries = state.pool.station_summaries().await;
            ResponseBody::success(serde_json::json!(summaries))
        }

        Procedure::ListTemplates => {
            let templates = state.templates.read().await;
            ResponseBody::success(serde_json::json!(*templates))
        }

        Procedure::AddChargingStations { templates, count_per_template } => {
            add_charging_stations(state, templates, count_per_template).await
        }

        Procedure::DeleteChargingStations { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.remove_station(&hid).await })
        }

        Procedure::StartChargingStation { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.start_station(&hid).await })
        }

        Procedure::StopChargingStation { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.stop_station(&hid).await })
        }

        Procedure::OpenConnection { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.open_connection(&hid).await })
        }

        Procedure::CloseConnection { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.close_connection(&hid).await })
        }

        Procedure::StartTransaction { hash_ids, connector_id, id_tag } => {
            aggregate!(state, hash_ids, |pool, hid| {
                let id_tag = id_tag.clone();
                async move { pool.start_transaction(&hid, connector_id, id_tag).await }
            })
        }

        Procedure::StopTransaction { hash_ids, connector_id } => {
            aggregate!(state, hash_ids, |pool, hid| async move {
                pool.stop_transaction(&hid, connector_id).await
            })
        }

        Procedure::StartAutomaticTransactionGenerator { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.start_atg(&hid).await })
        }

        Procedure::StopAutomaticTransactionGenerator { hash_ids } => {
            aggregate!(state, hash_ids, |pool, hid| async move { pool.stop_atg(&hid).await })
        }

        Procedure::SetSupervisionUrl { hash_ids, url } => {
            aggregate!(state, hash_ids, |pool, hid| {
                let url = url.clone();
                async move { pool.set_supervision_url(&hid, url).await }
            })
        }

        Procedure::StartSimulator => match state.pool.start().await {
            Ok(()) => ResponseBody::success(Value::Null),
            Err(e) => ResponseBody::failure(e.to_string()),
        },

        Procedure::StopSimulator => match state.pool.stop().await {
            Ok(()) => ResponseBody::success(Value::Null),
            Err(e) => ResponseBody::failure(e.to_string()),
        },
    }
}

async fn add_charging_stations(
    state: &UiState,
    templates: Vec<StationTemplate>,
    count_per_template: u32,
) -> ResponseBody {
    let max = state.config.max_stations_per_add;
    let requested = templates.len() as u64 * count_per_template as u64;
    if requested > max as u64 {
        return ResponseBody::failure(format!(
            "requested {requested} stations exceeds the configured limit of {max} per add"
        ));
    }

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for template in templates {
        let template = Arc::new(template);
        let first_index = state.reserve_indices(&template.base_name, count_per_template);
        for offset in 0..count_per_template {
            let index = first_index + offset;
            match state.pool.add(template.clone(), index).await {
                Ok(hash_id) => succeeded.push(hash_id),
                Err(e) => failed.push(FailedStation {
                    hash_id: format!("{}-{index:05}", template.base_name),
                    error_message: e.to_string(),
                }),
            }
        }
    }
    ResponseBody::aggregated(succeeded, failed)
}
