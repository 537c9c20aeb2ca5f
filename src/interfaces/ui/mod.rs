//! UI control-plane server (C13): shared state and procedure dispatch behind
//! an HTTP POST endpoint and a persistent WebSocket, both speaking the same
//! `[uuid, procedure, payload]` / `[uuid, {status, ...}]` envelope (§4.13).

mod auth;
mod compression;
pub mod dispatch;
pub mod dto;
mod http;
pub mod router;
mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use validator::Validate;

use crate::broadcast::BroadcastRegistry;
use crate::config::{StationTemplate, UiConfig};
use crate::worker::WorkerPool;

pub use router::build_router;

/// Channel every connected UI client subscribes to for station lifecycle
/// notifications (§4.14's genuine multi-subscriber use — see DESIGN.md).
pub const EVENTS_CHANNEL: &str = "ui:events";

/// Shared state behind every UI route, cloned cheaply (everything inside is
/// already `Arc`/`Clone`).
#[derive(Clone)]
pub struct UiState {
    pub pool: Arc<dyn WorkerPool>,
    pub broadcast: BroadcastRegistry,
    pub config: Arc<UiConfig>,
    /// Named templates loaded from `templates_dir` at startup, keyed by file
    /// stem, for `ListTemplates`. `AddChargingStations` carries full template
    /// bodies in its own payload and never consults this map.
    pub templates: Arc<RwLock<HashMap<String, StationTemplate>>>,
    /// Next unused fleet index per template `base_name`, so repeated
    /// `AddChargingStations` calls for the same base name never collide on
    /// `station_hash_id` (§4.12's `add(template, index)` contract).
    next_index: Arc<DashMap<String, u32>>,
}

impl UiState {
    pub fn new(
        pool: Arc<dyn WorkerPool>,
        broadcast: BroadcastRegistry,
        config: UiConfig,
        templates: HashMap<String, StationTemplate>,
    ) -> Self {
        Self {
            pool,
            broadcast,
            config: Arc::new(config),
            templates: Arc::new(RwLock::new(templates)),
            next_index: Arc::new(DashMap::new()),
        }
    }

    /// Reserve the next `count` fleet indices for `base_name`, returning the
    /// first one; the caller assigns `first..first+count` to the stations it
    /// creates in this batch.
    pub fn reserve_indices(&self, base_name: &str, count: u32) -> u32 {
        let mut entry = self.next_index.entry(base_name.to_string()).or_insert(0);
        let first = *entry;
        *entry += count;
        first
    }
}

/// Load every `*.json` file directly under `dir` as a station template,
/// keyed by file stem. Missing or unreadable directory yields an empty map —
/// template files are an external collaborator (§1 non-goals), not something
/// whose absence should stop the supervisor from starting.
pub async fn load_templates(dir: &std::path::Path) -> HashMap<String, StationTemplate> {
    let mut out = HashMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "templates directory unavailable, starting with no named templates");
            return out;
        }
    };
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error walking templates directory");
                break;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<StationTemplate>(&text) {
                Ok(template) => match template.validate() {
                    Ok(()) => {
                        out.insert(stem.to_string(), template);
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "invalid station template"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to parse station template"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read station template"),
        }
    }
    out
}
