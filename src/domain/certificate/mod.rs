pub mod manager;

pub use manager::{CertificateEntry, CertificateManager, CertificateUse, DeleteOutcome};
