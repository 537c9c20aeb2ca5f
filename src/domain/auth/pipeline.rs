//! Authentication pipeline (§4.7): ordered strategies evaluated by priority,
//! version-agnostic identifier model.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::auth::{AuthCache, LocalAuthList};
use crate::domain::ocpp::Identifier;

/// Authorization verdict shared by both protocol versions' status taxonomy
/// (1.6's `AuthorizationStatus` is a subset of 2.0.1's).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Which operation triggered authorization — affects the offline fallback
/// rule (only `TransactionStop` may fall back) and the `localPreAuthorize`
/// short-circuit (only applies to `TransactionStart`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthContext {
    TransactionStart,
    TransactionStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthVerdict {
    pub status: AuthStatus,
    pub method: &'static str,
}

/// A single strategy in the pipeline. Returns `None` when it has no opinion
/// (the identifier isn't in its data set, or the remote round-trip could not
/// be attempted), letting the pipeline fall through to the next priority.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn priority(&self) -> u8;
    async fn evaluate(&self, identifier: &Identifier, ctx: AuthContext) -> Option<AuthVerdict>;
}

pub struct LocalStrategy<'a> {
    pub list: &'a LocalAuthList,
}

#[async_trait]
impl<'a> AuthStrategy for LocalStrategy<'a> {
    fn priority(&self) -> u8 {
        1
    }

    async fn evaluate(&self, identifier: &Identifier, _ctx: AuthContext) -> Option<AuthVerdict> {
        self.list.lookup(&identifier.value).map(|status| AuthVerdict {
            status,
            method: "Local",
        })
    }
}

/// Evaluates the Remote strategy: a round-trip `Authorize` to the CSMS. The
/// simulator has no CSMS to call directly from this module, so the actual
/// round-trip is injected as a closure by the caller (the correlator owns
/// the session).
pub struct RemoteStrategy<'a, F> {
    pub cache: &'a AuthCache,
    pub authorize: F,
    pub cache_lifetime_secs: u64,
}

#[async_trait]
impl<'a, F, Fut> AuthStrategy for RemoteStrategy<'a, F>
where
    F: Fn(&Identifier) -> Fut + Send + Sync,
    Fut: Future<Output = Option<AuthStatus>> + Send,
{
    fn priority(&self) -> u8 {
        2
    }

    async fn evaluate(&self, identifier: &Identifier, _ctx: AuthContext) -> Option<AuthVerdict> {
        if let Some(entry) = self.cache.lookup(&identifier.value) {
            return Some(AuthVerdict {
                status: entry.status,
                method: "Remote",
            });
        }
        let status = (self.authorize)(identifier).await?;
        if status == AuthStatus::Accepted && self.cache_lifetime_secs > 0 {
            self.cache
                .insert(&identifier.value, status, "Remote", self.cache_lifetime_secs);
        }
        Some(AuthVerdict {
            status,
            method: "Remote",
        })
    }
}

/// Evaluates the Certificate strategy against installed certificate hash
/// data. `None` when the identifier carries no certificate hash data, or the
/// verifier found nothing installed for the requested use.
pub struct CertificateStrategy<F> {
    pub verify: F,
}

#[async_trait]
impl<F, Fut> AuthStrategy for CertificateStrategy<F>
where
    F: Fn(&Identifier) -> Fut + Send + Sync,
    Fut: Future<Output = Option<bool>> + Send,
{
    fn priority(&self) -> u8 {
        3
    }

    async fn evaluate(&self, identifier: &Identifier, _ctx: AuthContext) -> Option<AuthVerdict> {
        identifier.certificate_hash_data.as_ref()?;
        let verified = (self.verify)(identifier).await?;
        Some(AuthVerdict {
            status: if verified {
                AuthStatus::Accepted
            } else {
                AuthStatus::Invalid
            },
            method: "Certificate",
        })
    }
}

/// Runs a sequence of strategies in priority order, applying the offline
/// fallback / `localPreAuthorize` rules from §4.7.
pub struct AuthPipeline {
    pub offline_authorization_enabled: bool,
    pub local_pre_authorize: bool,
}

impl AuthPipeline {
    pub fn new(offline_authorization_enabled: bool, local_pre_authorize: bool) -> Self {
        Self {
            offline_authorization_enabled,
            local_pre_authorize,
        }
    }

    /// Evaluate `strategies` (already sorted by priority) against `identifier`.
    pub async fn evaluate(
        &self,
        strategies: &[&(dyn AuthStrategy)],
        identifier: &Identifier,
        ctx: AuthContext,
    ) -> AuthVerdict {
        for strategy in strategies {
            if !self.local_pre_authorize
                && strategy.priority() == 1
                && ctx == AuthContext::TransactionStart
            {
                // Local has a hit but localPreAuthorize=false: Remote still runs,
                // so skip Local's verdict and fall through.
                continue;
            }
            if let Some(verdict) = strategy.evaluate(identifier, ctx).await {
                return verdict;
            }
        }
        if self.offline_authorization_enabled && ctx == AuthContext::TransactionStop {
            return AuthVerdict {
                status: AuthStatus::Accepted,
                method: "OfflineFallback",
            };
        }
        AuthVerdict {
            status: AuthStatus::Invalid,
            method: "None",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> Identifier {
        Identifier::from_id_tag(value)
    }

    #[tokio::test]
    async fn offline_fallback_only_applies_to_stop() {
        let pipeline = AuthPipeline::new(true, true);
        let verdict = pipeline.evaluate(&[], &id("UNKNOWN"), AuthContext::TransactionStop).await;
        assert_eq!(verdict.status, AuthStatus::Accepted);
        assert_eq!(verdict.method, "OfflineFallback");

        let verdict = pipeline.evaluate(&[], &id("UNKNOWN"), AuthContext::TransactionStart).await;
        assert_eq!(verdict.status, AuthStatus::Invalid);
    }

    #[tokio::test]
    async fn local_pre_authorize_false_skips_local_hit_on_start() {
        let list = LocalAuthList::new();
        list.replace_full(1, vec![("TAG1".into(), AuthStatus::Accepted, None)]);
        let local = LocalStrategy { list: &list };
        let remote = RemoteStrategy {
            cache: &AuthCache::new(10),
            authorize: |_: &Identifier| async { Some(AuthStatus::Blocked) },
            cache_lifetime_secs: 0,
        };
        let pipeline = AuthPipeline::new(false, false);
        let strategies: Vec<&dyn AuthStrategy> = vec![&local, &remote];
        let verdict = pipeline
            .evaluate(&strategies, &id("TAG1"), AuthContext::TransactionStart)
            .await;
        assert_eq!(verdict.method, "Remote");
        assert_eq!(verdict.status, AuthStatus::Blocked);
    }
}
