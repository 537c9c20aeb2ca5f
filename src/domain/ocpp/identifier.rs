//! Unified, version-agnostic authorization identifier (§4.7, §9).
//!
//! OCPP 1.6 only knows `idTag` (a bare string). OCPP 2.0.1 generalizes this
//! to a typed `idToken`. The authentication pipeline works against this
//! single shape so strategies never need to know which wire version is in
//! play; `convert_to_unified` / `convert_from_unified` are the only places
//! that translate.

use serde::{Deserialize, Serialize};

use super::OcppVersion;

/// Maximum length of a 1.6 idTag.
pub const ID_TAG_MAX_LEN: usize = 20;
/// Maximum length of any 2.0.1 token value.
pub const TOKEN_MAX_LEN: usize = 36;

/// The taxonomy of identifier carriers across both protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierType {
    IdTag,
    Central,
    Local,
    #[serde(rename = "eMAID")]
    EMaid,
    Iso14443,
    Iso15693,
    KeyCode,
    MacAddress,
    Certificate,
    NoAuthorization,
    MobileApp,
    Biometric,
}

/// A version-agnostic authorization identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: IdentifierType,
    pub value: String,
    pub ocpp_version: OcppVersion,
    pub additional_info: Vec<String>,
    pub certificate_hash_data: Option<CertificateHashData>,
}

/// Certificate fingerprint carried by a `Certificate`-type identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateHashData {
    pub hash_algorithm: String,
    pub issuer_name_hash: String,
    pub issuer_key_hash: String,
    pub serial_number: String,
}

/// Error returned when an identifier value violates the length bound for
/// its protocol version.
#[derive(Debug, thiserror::Error)]
#[error("identifier value {0:?} exceeds the {1}-char limit for {2}")]
pub struct IdentifierLengthError(pub String, pub usize, pub OcppVersion);

impl Identifier {
    pub fn new(id_type: IdentifierType, value: impl Into<String>, version: OcppVersion) -> Self {
        Self {
            id_type,
            value: value.into(),
            ocpp_version: version,
            additional_info: Vec::new(),
            certificate_hash_data: None,
        }
    }

    /// Validate against the length bound for this identifier's protocol version.
    pub fn validate_length(&self) -> Result<(), IdentifierLengthError> {
        let limit = match self.ocpp_version {
            OcppVersion::V16 => ID_TAG_MAX_LEN,
            OcppVersion::V201 => TOKEN_MAX_LEN,
        };
        if self.value.len() > limit {
            return Err(IdentifierLengthError(
                self.value.clone(),
                limit,
                self.ocpp_version,
            ));
        }
        Ok(())
    }

    /// Build a unified identifier from a bare 1.6 idTag.
    pub fn from_id_tag(id_tag: impl Into<String>) -> Self {
        Self::new(IdentifierType::IdTag, id_tag, OcppVersion::V16)
    }

    /// Build a unified identifier from a 2.0.1 idToken `(type, value)` pair.
    pub fn from_id_token(id_type: IdentifierType, value: impl Into<String>) -> Self {
        Self::new(id_type, value, OcppVersion::V201)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_tag_over_limit_is_rejected() {
        let id = Identifier::from_id_tag("X".repeat(21));
        assert!(id.validate_length().is_err());
    }

    #[test]
    fn id_tag_at_limit_is_accepted() {
        let id = Identifier::from_id_tag("X".repeat(20));
        assert!(id.validate_length().is_ok());
    }

    #[test]
    fn token_over_limit_is_rejected() {
        let id = Identifier::from_id_token(IdentifierType::Central, "Y".repeat(37));
        assert!(id.validate_length().is_err());
    }
}
