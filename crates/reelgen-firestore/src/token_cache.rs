//! Cached OAuth tokens for Firestore.
//!
//! A token is reused until a minute before it expires. Refreshes are
//! serialized behind the write lock, and a failed refresh keeps serving the
//! old token while it has not actually expired.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const REFRESH_AHEAD: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Lease {
    token: String,
    expires_at: Instant,
}

impl Lease {
    fn fresh(&self, now: Instant) -> bool {
        now + REFRESH_AHEAD < self.expires_at
    }

    fn alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

enum Source {
    Provider(Arc<dyn TokenProvider>),
    /// Emulator and tests.
    Fixed(String),
}

pub struct TokenCache {
    source: Source,
    lease: RwLock<Option<Lease>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            source: Source::Provider(provider),
            lease: RwLock::new(None),
        }
    }

    /// A cache that always hands out `token`.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Fixed(token.into()),
            lease: RwLock::new(None),
        }
    }

    /// Drop the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        self.lease.write().await.take();
    }

    pub async fn get_token(&self) -> FirestoreResult<String> {
        let provider = match &self.source {
            Source::Fixed(token) => return Ok(token.clone()),
            Source::Provider(provider) => provider,
        };

        if let Some(lease) = self.lease.read().await.as_ref() {
            if lease.fresh(Instant::now()) {
                return Ok(lease.token.clone());
            }
        }

        let mut slot = self.lease.write().await;
        let now = Instant::now();
        if let Some(lease) = slot.as_ref().filter(|l| l.fresh(now)) {
            return Ok(lease.token.clone());
        }

        match provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                // Already expired tokens convert to zero and are refreshed next call.
                let remaining = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let lease = Lease {
                    token: token.as_str().to_string(),
                    expires_at: now + remaining,
                };
                debug!(valid_secs = remaining.as_secs(), "Refreshed Firestore token");
                *slot = Some(lease.clone());
                Ok(lease.token)
            }
            Err(e) => match slot.as_ref().filter(|l| l.alive(now)) {
                Some(lease) => {
                    warn!(error = %e, "Token refresh failed, reusing current token");
                    Ok(lease.token.clone())
                }
                None => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token_survives_invalidate() {
        let cache = TokenCache::fixed("owner");
        assert_eq!(cache.get_token().await.unwrap(), "owner");
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "owner");
    }

    #[test]
    fn test_lease_freshness() {
        let now = Instant::now();
        let lease = Lease {
            token: "t".into(),
            expires_at: now + Duration::from_secs(30),
        };
        assert!(!lease.fresh(now));
        assert!(lease.alive(now));

        let long = Lease {
            token: "t".into(),
            expires_at: now + Duration::from_secs(3000),
        };
        assert!(long.fresh(now));
    }
}
