//! Per-call authorization strategy wiring (§4.7).
//!
//! `AuthPipeline::evaluate` borrows a slice of trait objects, and the Remote
//! strategy's round-trip closure needs a live correlator, so the strategy
//! list is rebuilt fresh for every `Authorize`/local-swipe decision rather
//! than stored alongside the other `Arc<T>` fields on `HandlerContext`.

use std::time::Duration;

use serde_json::Value;

use crate::application::commands::{v16, v201};
use crate::application::correlator::Correlator;
use crate::domain::auth::pipeline::{
    AuthContext, AuthStatus, AuthStrategy, AuthVerdict, CertificateStrategy, LocalStrategy,
    RemoteStrategy,
};
use crate::domain::auth::{AuthCache, AuthPipeline, LocalAuthList};
use crate::domain::certificate::CertificateManager;
use crate::domain::ocpp::{Identifier, OcppVersion};

pub struct Authorizer<'a> {
    pub pipeline: &'a AuthPipeline,
    pub local_list: &'a LocalAuthList,
    pub cache: &'a AuthCache,
    pub cache_lifetime_secs: u64,
    pub certificates: &'a CertificateManager,
    pub correlator: &'a Correlator,
    pub station_hash_id: &'a str,
    pub ocpp_version: OcppVersion,
    pub action_timeout: Duration,
}

impl<'a> Authorizer<'a> {
    pub async fn authorize(&self, identifier: &Identifier, ctx: AuthContext) -> AuthVerdict {
        let local = LocalStrategy { list: self.local_list };
        let remote = RemoteStrategy {
            cache: self.cache,
            cache_lifetime_secs: self.cache_lifetime_secs,
            authorize: move |id: &Identifier| self.remote_authorize(id),
        };
        let certificate = CertificateStrategy {
            verify: move |id: &Identifier| self.verify_certificate(id),
        };
        let strategies: Vec<&dyn AuthStrategy> = vec![&local, &remote, &certificate];
        self.pipeline.evaluate(&strategies, identifier, ctx).await
    }

    async fn remote_authorize(&self, identifier: &Identifier) -> Option<AuthStatus> {
        let (payload, action) = match self.ocpp_version {
            OcppVersion::V16 => (
                serde_json::to_value(v16::authorize_request(&identifier.value)).ok()?,
                v16::ACTION_AUTHORIZE,
            ),
            OcppVersion::V201 => (
                serde_json::to_value(v201::authorize_request(identifier)).ok()?,
                v201::ACTION_AUTHORIZE,
            ),
        };
        let result = self
            .correlator
            .request(action, payload, self.action_timeout)
            .await
            .ok()?;
        parse_authorize_status(self.ocpp_version, &result)
    }

    async fn verify_certificate(&self, identifier: &Identifier) -> Option<bool> {
        let hash = identifier.certificate_hash_data.as_ref()?;
        let entries = self.certificates.list(self.station_hash_id, None).await.ok()?;
        Some(entries.iter().any(|e| {
            e.hash_algorithm == hash.hash_algorithm
                && e.issuer_name_hash == hash.issuer_name_hash
                && e.issuer_key_hash == hash.issuer_key_hash
                && e.serial_number == hash.serial_number
        }))
    }
}

/// Map a CSMS `AuthorizeResponse`'s status string onto the unified taxonomy.
/// Both versions nest it one level deeper (`idTagInfo.status` / `idTokenInfo.status`)
/// but spell the five values identically, so a single string match covers both.
fn parse_authorize_status(version: OcppVersion, payload: &Value) -> Option<AuthStatus> {
    let status = match version {
        OcppVersion::V16 => payload.get("idTagInfo")?.get("status")?.as_str()?,
        OcppVersion::V201 => payload.get("idTokenInfo")?.get("status")?.as_str()?,
    };
    match status {
        "Accepted" => Some(AuthStatus::Accepted),
        "Blocked" => Some(AuthStatus::Blocked),
        "Expired" => Some(AuthStatus::Expired),
        "ConcurrentTx" => Some(AuthStatus::ConcurrentTx),
        _ => Some(AuthStatus::Invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v16_nested_status() {
        let payload = serde_json::json!({ "idTagInfo": { "status": "Blocked" } });
        assert_eq!(parse_authorize_status(OcppVersion::V16, &payload), Some(AuthStatus::Blocked));
    }

    #[test]
    fn parses_v201_nested_status() {
        let payload = serde_json::json!({ "idTokenInfo": { "status": "Accepted" } });
        assert_eq!(parse_authorize_status(OcppVersion::V201, &payload), Some(AuthStatus::Accepted));
    }

    #[test]
    fn unrecognized_status_string_is_invalid() {
        let payload = serde_json::json!({ "idTagInfo": { "status": "Unknown" } });
        assert_eq!(parse_authorize_status(OcppVersion::V16, &payload), Some(AuthStatus::Invalid));
    }
}
