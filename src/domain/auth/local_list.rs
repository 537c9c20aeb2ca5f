//! Local authorization list (§4.6): versioned map, `Full` replace or
//! `Differential` merge, strictly increasing version.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::error::{DomainError, DomainResult};

use super::pipeline::AuthStatus;

#[derive(Debug, Clone)]
pub struct LocalListEntry {
    pub status: AuthStatus,
    pub expiry_date: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    version: u64,
    entries: HashMap<String, LocalListEntry>,
}

pub struct LocalAuthList {
    inner: Mutex<Inner>,
}

impl LocalAuthList {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    /// `SendLocalList(Full)`: replace all entries and set the version.
    pub fn replace_full(
        &self,
        version: u64,
        entries: Vec<(String, AuthStatus, Option<DateTime<Utc>>)>,
    ) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if version <= inner.version && inner.version != 0 {
            return Err(DomainError::VersionMismatch {
                have: inner.version,
                got: version,
            });
        }
        inner.entries = entries
            .into_iter()
            .map(|(id, status, expiry_date)| (id, LocalListEntry { status, expiry_date }))
            .collect();
        inner.version = version;
        Ok(())
    }

    /// `SendLocalList(Differential)`: apply upserts/removals on top of the
    /// existing map. A `None` status removes the entry.
    pub fn apply_differential(
        &self,
        version: u64,
        deltas: Vec<(String, Option<(AuthStatus, Option<DateTime<Utc>>)>)>,
    ) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if version <= inner.version {
            return Err(DomainError::VersionMismatch {
                have: inner.version,
                got: version,
            });
        }
        for (id, change) in deltas {
            match change {
                Some((status, expiry_date)) => {
                    inner.entries.insert(id, LocalListEntry { status, expiry_date });
                }
                None => {
                    inner.entries.remove(&id);
                }
            }
        }
        inner.version = version;
        Ok(())
    }

    /// Look up a status, treating an expired entry as absent.
    pub fn lookup(&self, identifier: &str) -> Option<AuthStatus> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(identifier)?;
        if let Some(expiry) = entry.expiry_date {
            if Utc::now() >= expiry {
                return Some(AuthStatus::Expired);
            }
        }
        Some(entry.status)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalAuthList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_must_strictly_increase() {
        let list = LocalAuthList::new();
        list.replace_full(1, vec![("TAG1".into(), AuthStatus::Accepted, None)])
            .unwrap();
        assert!(matches!(
            list.replace_full(1, vec![]),
            Err(DomainError::VersionMismatch { .. })
        ));
        assert!(list.replace_full(2, vec![]).is_ok());
    }

    #[test]
    fn differential_merges_without_clobbering_others() {
        let list = LocalAuthList::new();
        list.replace_full(
            1,
            vec![
                ("TAG1".into(), AuthStatus::Accepted, None),
                ("TAG2".into(), AuthStatus::Accepted, None),
            ],
        )
        .unwrap();
        list.apply_differential(2, vec![("TAG2".into(), None)])
            .unwrap();
        assert!(list.lookup("TAG1").is_some());
        assert!(list.lookup("TAG2").is_none());
    }

    #[test]
    fn expired_entry_reports_expired_status() {
        let list = LocalAuthList::new();
        list.replace_full(
            1,
            vec![(
                "TAG1".into(),
                AuthStatus::Accepted,
                Some(Utc::now() - chrono::Duration::seconds(1)),
            )],
        )
        .unwrap();
        assert_eq!(list.lookup("TAG1"), Some(AuthStatus::Expired));
    }
}
