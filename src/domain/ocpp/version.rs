//! OCPP protocol version
//!
//! Defines the supported OCPP versions. Each station negotiates exactly one
//! of these as its WebSocket subprotocol and keeps it for the life of the
//! session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported OCPP protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
    /// OCPP 2.0.1
    V201,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier for this OCPP version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
        }
    }

    /// Parse an OCPP version from a subprotocol string.
    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.6" => Some(Self::V16),
            "ocpp2.0.1" => Some(Self::V201),
            _ => None,
        }
    }

    /// Parse from the template's `ocppVersion` field, which uses the same
    /// spelling as §6's option table (`"1.6"` / `"2.0.1"`).
    pub fn from_template_str(s: &str) -> Option<Self> {
        match s.trim() {
            "1.6" => Some(Self::V16),
            "2.0.1" => Some(Self::V201),
            _ => Self::from_subprotocol(s),
        }
    }

    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V16 => "1.6",
            Self::V201 => "2.0.1",
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_roundtrip() {
        for v in [OcppVersion::V16, OcppVersion::V201] {
            assert_eq!(OcppVersion::from_subprotocol(v.subprotocol()), Some(v));
        }
    }

    #[test]
    fn template_strings_parse() {
        assert_eq!(OcppVersion::from_template_str("1.6"), Some(OcppVersion::V16));
        assert_eq!(
            OcppVersion::from_template_str("2.0.1"),
            Some(OcppVersion::V201)
        );
        assert_eq!(OcppVersion::from_template_str("3.0"), None);
    }
}
