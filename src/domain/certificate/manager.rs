//! Certificate manager (§4.15). Per-station directory tree keyed by
//! sanitized station hash id and certificate use.

use std::path::{Path, PathBuf};

use base64::Engine;
use sha2::{Digest, Sha256};
use x509_parser::prelude::FromDer;

use crate::support::errors::InfraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateUse {
    CsmsRootCertificate,
    V2GRootCertificate,
    ManufacturerRootCertificate,
    MORootCertificate,
}

impl CertificateUse {
    pub fn as_dir(&self) -> &'static str {
        match self {
            Self::CsmsRootCertificate => "CSMSRootCertificate",
            Self::V2GRootCertificate => "V2GRootCertificate",
            Self::ManufacturerRootCertificate => "ManufacturerRootCertificate",
            Self::MORootCertificate => "MORootCertificate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CSMSRootCertificate" => Some(Self::CsmsRootCertificate),
            "V2GRootCertificate" => Some(Self::V2GRootCertificate),
            "ManufacturerRootCertificate" => Some(Self::ManufacturerRootCertificate),
            "MORootCertificate" => Some(Self::MORootCertificate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateEntry {
    pub cert_use: CertificateUse,
    pub hash_algorithm: &'static str,
    pub issuer_name_hash: String,
    pub issuer_key_hash: String,
    pub serial_number: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Accepted,
    NotFound,
    Failed,
}

pub struct CertificateManager {
    root_dir: PathBuf,
}

fn sanitize_station_id(station_id: &str) -> String {
    station_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

impl CertificateManager {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn use_dir(&self, station_id: &str, cert_use: CertificateUse) -> PathBuf {
        self.root_dir
            .join(sanitize_station_id(station_id))
            .join(cert_use.as_dir())
    }

    /// `store(stationId, use, pem)`: validate PEM markers, parse X.509,
    /// compute serial, write `<use>/<serial>.pem` atomically.
    pub async fn store(
        &self,
        station_id: &str,
        cert_use: CertificateUse,
        pem: &str,
    ) -> Result<CertificateEntry, InfraError> {
        let body = extract_pem_body(pem).ok_or(InfraError::InvalidPem)?;
        let der = base64::engine::general_purpose::STANDARD
            .decode(body.as_bytes())
            .map_err(|_| InfraError::InvalidPem)?;

        let entry = parse_certificate(cert_use, &der, pem);

        let dir = self.use_dir(station_id, cert_use);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InfraError::Io(e.to_string()))?;
        let path = dir.join(format!("{}.pem", entry.serial_number));
        let tmp = path.with_extension("pem.tmp");
        tokio::fs::write(&tmp, pem.as_bytes())
            .await
            .map_err(|e| InfraError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| InfraError::Io(e.to_string()))?;

        Ok(CertificateEntry { path, ..entry })
    }

    /// `delete(stationId, hashData)`: match on the certificate's hash
    /// quadruple and remove the matching file.
    pub async fn delete(
        &self,
        station_id: &str,
        cert_use: CertificateUse,
        hash_algorithm: &str,
        serial_number: &str,
        issuer_name_hash: &str,
        issuer_key_hash: &str,
    ) -> DeleteOutcome {
        let entries = match self.list(station_id, Some(&[cert_use])).await {
            Ok(entries) => entries,
            Err(_) => return DeleteOutcome::Failed,
        };
        let Some(matched) = entries.into_iter().find(|e| {
            e.hash_algorithm == hash_algorithm
                && e.serial_number == serial_number
                && e.issuer_name_hash == issuer_name_hash
                && e.issuer_key_hash == issuer_key_hash
        }) else {
            return DeleteOutcome::NotFound;
        };
        match tokio::fs::remove_file(&matched.path).await {
            Ok(()) => DeleteOutcome::Accepted,
            Err(_) => DeleteOutcome::Failed,
        }
    }

    /// `list(stationId, filterUses?)`: compute the hash chain per installed
    /// certificate.
    pub async fn list(
        &self,
        station_id: &str,
        filter_uses: Option<&[CertificateUse]>,
    ) -> Result<Vec<CertificateEntry>, InfraError> {
        let uses: Vec<CertificateUse> = filter_uses.map(|f| f.to_vec()).unwrap_or_else(|| {
            vec![
                CertificateUse::CsmsRootCertificate,
                CertificateUse::V2GRootCertificate,
                CertificateUse::ManufacturerRootCertificate,
                CertificateUse::MORootCertificate,
            ]
        });

        let mut out = Vec::new();
        for cert_use in uses {
            let dir = self.use_dir(station_id, cert_use);
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(InfraError::Io(e.to_string())),
            };
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| InfraError::Io(e.to_string()))?
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                    continue;
                }
                let pem = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| InfraError::Io(e.to_string()))?;
                let Some(body) = extract_pem_body(&pem) else {
                    continue;
                };
                let Ok(der) = base64::engine::general_purpose::STANDARD.decode(body.as_bytes())
                else {
                    continue;
                };
                let parsed = parse_certificate(cert_use, &der, &pem);
                out.push(CertificateEntry { path, ..parsed });
            }
        }
        Ok(out)
    }
}

fn extract_pem_body(pem: &str) -> Option<String> {
    let begin = pem.find("-----BEGIN CERTIFICATE-----")?;
    let end = pem.find("-----END CERTIFICATE-----")?;
    if end <= begin {
        return None;
    }
    let body_start = begin + "-----BEGIN CERTIFICATE-----".len();
    Some(
        pem[body_start..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect(),
    )
}

/// Parse the certificate and compute its hash chain; falls back to a
/// deterministic hash of the decoded body when X.509 parsing fails (§4.15).
fn parse_certificate(cert_use: CertificateUse, der: &[u8], pem: &str) -> CertificateEntry {
    if let Ok((_, cert)) = x509_parser::certificate::X509Certificate::from_der(der) {
        let issuer_name_hash = sha256_hex(cert.issuer().as_raw());
        let issuer_key_hash = sha256_hex(cert.public_key().raw);
        let serial_number = cert.raw_serial_as_string().to_uppercase();
        return CertificateEntry {
            cert_use,
            hash_algorithm: "SHA256",
            issuer_name_hash,
            issuer_key_hash,
            serial_number,
            path: PathBuf::new(),
        };
    }

    let issuer_key_hash = sha256_hex(der);
    let prefix_len = der.len().min(64);
    let issuer_name_hash = sha256_hex(&der[..prefix_len]);
    let serial_number = sha256_hex(pem.as_bytes())[..16].to_uppercase();
    CertificateEntry {
        cert_use,
        hash_algorithm: "SHA256",
        issuer_name_hash,
        issuer_key_hash,
        serial_number,
        path: PathBuf::new(),
    }
}

fn dir_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK_PEM: &str = "-----BEGIN CERTIFICATE-----\nYWJjZGVmZ2hpams=\n-----END CERTIFICATE-----\n";

    #[tokio::test]
    async fn store_and_list_roundtrip_with_fallback_hash() {
        let dir = std::env::temp_dir().join(format!("ocpp-sim-cert-{}", uuid::Uuid::new_v4()));
        let manager = CertificateManager::new(&dir);

        let entry = manager
            .store("CS-001", CertificateUse::CsmsRootCertificate, FALLBACK_PEM)
            .await
            .unwrap();
        assert!(dir_exists(&entry.path));
        assert_eq!(entry.hash_algorithm, "SHA256");

        let listed = manager
            .list("CS-001", Some(&[CertificateUse::CsmsRootCertificate]))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].serial_number, entry.serial_number);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn delete_unknown_hash_is_not_found() {
        let dir = std::env::temp_dir().join(format!("ocpp-sim-cert-{}", uuid::Uuid::new_v4()));
        let manager = CertificateManager::new(&dir);
        manager
            .store("CS-001", CertificateUse::CsmsRootCertificate, FALLBACK_PEM)
            .await
            .unwrap();

        let outcome = manager
            .delete(
                "CS-001",
                CertificateUse::CsmsRootCertificate,
                "SHA256",
                "DOES-NOT-EXIST",
                "x",
                "y",
            )
            .await;
        assert_eq!(outcome, DeleteOutcome::NotFound);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[test]
    fn invalid_pem_is_rejected() {
        assert!(extract_pem_body("not a pem").is_none());
    }
}
