//! UI control-plane wire types (§4.13).
//!
//! Request envelope `[uuid, procedure, payload]` and response envelope
//! `[uuid, {status, ...}]` are plain JSON tuples — serde encodes Rust tuples
//! as JSON arrays natively, so no custom (de)serializer is needed for the
//! envelope shape itself, only for picking the right payload type from the
//! procedure name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::config::StationTemplate;

/// The procedure name plus its still-undecoded payload, as read off the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequest {
    pub id: Uuid,
    pub procedure: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawRequest {
    /// Parse from the `[uuid, procedure, payload]` array form.
    pub fn from_envelope(value: Value) -> Result<Self, String> {
        let arr = value.as_array().ok_or("request envelope must be an array")?;
        if arr.len() != 3 {
            return Err(format!("request envelope must have 3 elements, got {}", arr.len()));
        }
        let id: Uuid = serde_json::from_value(arr[0].clone()).map_err(|e| format!("invalid uuid: {e}"))?;
        let procedure = arr[1]
            .as_str()
            .ok_or("procedure name must be a string")?
            .to_string();
        Ok(Self {
            id,
            procedure,
            payload: arr[2].clone(),
        })
    }
}

/// One parsed, ready-to-execute UI command.
#[derive(Debug, Clone)]
pub enum Procedure {
    ListChargingStations,
    ListTemplates,
    AddChargingStations { templates: Vec<StationTemplate>, count_per_template: u32 },
    DeleteChargingStations { hash_ids: Vec<String> },
    StartChargingStation { hash_ids: Vec<String> },
    StopChargingStation { hash_ids: Vec<String> },
    OpenConnection { hash_ids: Vec<String> },
    CloseConnection { hash_ids: Vec<String> },
    StartTransaction { hash_ids: Vec<String>, connector_id: u32, id_tag: String },
    StopTransaction { hash_ids: Vec<String>, connector_id: u32 },
    StartAutomaticTransactionGenerator { hash_ids: Vec<String> },
    StopAutomaticTransactionGenerator { hash_ids: Vec<String> },
    SetSupervisionUrl { hash_ids: Vec<String>, url: String },
    StartSimulator,
    StopSimulator,
}

#[derive(Debug, Clone, Deserialize, Default, Validate)]
#[serde(rename_all = "camelCase")]
struct HashIdsPayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "hashIds must not be empty"))]
    hash_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct TransactionPayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "hashIds must not be empty"))]
    hash_ids: Vec<String>,
    #[validate(range(min = 1, message = "connectorId must be at least 1"))]
    connector_id: u32,
    #[serde(default)]
    id_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SupervisionUrlPayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "hashIds must not be empty"))]
    hash_ids: Vec<String>,
    #[validate(length(min = 1, message = "url must not be empty"))]
    url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AddStationsPayload {
    #[validate(length(min = 1, message = "templates must not be empty"), nested)]
    templates: Vec<StationTemplate>,
    #[serde(default = "default_count")]
    #[validate(range(min = 1, message = "countPerTemplate must be at least 1"))]
    count_per_template: u32,
}

fn default_count() -> u32 {
    1
}

impl Procedure {
    pub fn parse(name: &str, payload: Value) -> Result<Self, String> {
        let hash_ids = || -> Result<Vec<String>, String> {
            let p: HashIdsPayload = serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;
            p.validate().map_err(|e| e.to_string())?;
            Ok(p.hash_ids)
        };
        match name {
            "ListChargingStations" => Ok(Procedure::ListChargingStations),
            "ListTemplates" => Ok(Procedure::ListTemplates),
            "StartSimulator" => Ok(Procedure::StartSimulator),
            "StopSimulator" => Ok(Procedure::StopSimulator),
            "AddChargingStations" => {
                let p: AddStationsPayload = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                p.validate().map_err(|e| e.to_string())?;
                Ok(Procedure::AddChargingStations {
                    templates: p.templates,
                    count_per_template: p.count_per_template.max(1),
                })
            }
            "DeleteChargingStations" => Ok(Procedure::DeleteChargingStations { hash_ids: hash_ids()? }),
            "StartChargingStation" => Ok(Procedure::StartChargingStation { hash_ids: hash_ids()? }),
            "StopChargingStation" => Ok(Procedure::StopChargingStation { hash_ids: hash_ids()? }),
            "OpenConnection" => Ok(Procedure::OpenConnection { hash_ids: hash_ids()? }),
            "CloseConnection" => Ok(Procedure::CloseConnection { hash_ids: hash_ids()? }),
            "StartAutomaticTransactionGenerator" => {
                Ok(Procedure::StartAutomaticTransactionGenerator { hash_ids: hash_ids()? })
            }
            "StopAutomaticTransactionGenerator" => {
                Ok(Procedure::StopAutomaticTransactionGenerator { hash_ids: hash_ids()? })
            }
            "StartTransaction" => {
                let p: TransactionPayload = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                p.validate().map_err(|e| e.to_string())?;
                Ok(Procedure::StartTransaction {
                    hash_ids: p.hash_ids,
                    connector_id: p.connector_id,
                    id_tag: p.id_tag.unwrap_or_else(|| "TEST_TAG_1".to_string()),
                })
            }
            "StopTransaction" => {
                let p: TransactionPayload = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                p.validate().map_err(|e| e.to_string())?;
                Ok(Procedure::StopTransaction {
                    hash_ids: p.hash_ids,
                    connector_id: p.connector_id,
                })
            }
            "SetSupervisionUrl" => {
                let p: SupervisionUrlPayload = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                p.validate().map_err(|e| e.to_string())?;
                Ok(Procedure::SetSupervisionUrl { hash_ids: p.hash_ids, url: p.url })
            }
            other => Err(format!("unknown procedure: {other}")),
        }
    }

    /// Stable name for logging/metrics labels — mirrors the wire procedure name.
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::ListChargingStations => "ListChargingStations",
            Procedure::ListTemplates => "ListTemplates",
            Procedure::AddChargingStations { .. } => "AddChargingStations",
            Procedure::DeleteChargingStations { .. } => "DeleteChargingStations",
            Procedure::StartChargingStation { .. } => "StartChargingStation",
            Procedure::StopChargingStation { .. } => "StopChargingStation",
            Procedure::OpenConnection { .. } => "OpenConnection",
            Procedure::CloseConnection { .. } => "CloseConnection",
            Procedure::StartTransaction { .. } => "StartTransaction",
            Procedure::StopTransaction { .. } => "StopTransaction",
            Procedure::StartAutomaticTransactionGenerator { .. } => "StartAutomaticTransactionGenerator",
            Procedure::StopAutomaticTransactionGenerator { .. } => "StopAutomaticTransactionGenerator",
            Procedure::SetSupervisionUrl { .. } => "SetSupervisionUrl",
            Procedure::StartSimulator => "StartSimulator",
            Procedure::StopSimulator => "StopSimulator",
        }
    }

    /// Station hash ids this procedure addresses, if any (drives broadcast
    /// fan-out and aggregation).
    pub fn hash_ids(&self) -> Option<&[String]> {
        match self {
            Procedure::StartChargingStation { hash_ids }
            | Procedure::StopChargingStation { hash_ids }
            | Procedure::OpenConnection { hash_ids }
            | Procedure::CloseConnection { hash_ids }
            | Procedure::DeleteChargingStations { hash_ids }
            | Procedure::StartAutomaticTransactionGenerator { hash_ids }
            | Procedure::StopAutomaticTransactionGenerator { hash_ids } => Some(hash_ids),
            Procedure::StartTransaction { hash_ids, .. } | Procedure::StopTransaction { hash_ids, .. } => {
                Some(hash_ids)
            }
            Procedure::SetSupervisionUrl { hash_ids, .. } => Some(hash_ids),
            _ => None,
        }
    }
}

/// One station's outcome within an aggregated broadcast response.
#[derive(Debug, Clone, Serialize)]
pub struct FailedStation {
    pub hash_id: String,
    pub error_message: String,
}

/// `[uuid, {status, ...}]` response body (§4.13).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseBody {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Vec::is_empty", rename = "hashIdsSucceeded", default)]
        hash_ids_succeeded: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", rename = "hashIdsFailed", default)]
        hash_ids_failed: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", rename = "responsesFailed", default)]
        responses_failed: Vec<FailedStation>,
    },
    Failure {
        error: String,
    },
}

impl ResponseBody {
    pub fn success(data: Value) -> Self {
        ResponseBody::Success {
            data: Some(data),
            hash_ids_succeeded: Vec::new(),
            hash_ids_failed: Vec::new(),
            responses_failed: Vec::new(),
        }
    }

    pub fn aggregated(succeeded: Vec<String>, failed: Vec<FailedStation>) -> Self {
        let hash_ids_failed = failed.iter().map(|f| f.hash_id.clone()).collect();
        ResponseBody::Success {
            data: None,
            hash_ids_succeeded: succeeded,
            hash_ids_failed,
            responses_failed: failed,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ResponseBody::Failure { error: error.into() }
    }
}

pub fn envelope(id: Uuid, body: ResponseBody) -> Value {
    serde_json::json!([id, body])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hash_ids_payload() {
        let payload = serde_json::json!({"hashIds": ["CS-00001", "CS-00002"]});
        let p = Procedure::parse("StopChargingStation", payload).unwrap();
        match p {
            Procedure::StopChargingStation { hash_ids } => {
                assert_eq!(hash_ids, vec!["CS-00001", "CS-00002"]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_procedure() {
        assert!(Procedure::parse("DoesNotExist", Value::Null).is_err());
    }

    #[test]
    fn rejects_empty_hash_ids() {
        let payload = serde_json::json!({"hashIds": []});
        assert!(Procedure::parse("StopChargingStation", payload).is_err());
    }

    #[test]
    fn response_envelope_is_a_two_element_array() {
        let id = Uuid::nil();
        let v = envelope(id, ResponseBody::failure("boom"));
        assert!(v.is_array());
        assert_eq!(v.as_array().unwrap().len(), 2);
    }
}
