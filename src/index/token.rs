//! Installation credential cache.
//!
//! Repository read tokens are short-lived; this cache reuses a minted
//! token per installation until five minutes before its expiry.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::now_ts;
use crate::provider::{AccessToken, TokenSource};

/// Safety margin before token expiry, in seconds.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Per-installation token cache over a [`TokenSource`].
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    tokens: DashMap<i64, AccessToken>,
}

impl TokenCache {
    /// Creates an empty cache over the given source.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            tokens: DashMap::new(),
        }
    }

    /// Returns a valid credential for the installation, minting one when
    /// the cached token is absent or within the expiry margin.
    ///
    /// # Errors
    ///
    /// Returns a credential error when minting fails.
    pub async fn credential(&self, installation_id: i64) -> Result<String> {
        if let Some(token) = self.tokens.get(&installation_id) {
            if token.expires_at - EXPIRY_MARGIN_SECS > now_ts() {
                return Ok(token.secret.clone());
            }
        }

        let fresh = self.source.mint(installation_id).await?;
        let secret = fresh.secret.clone();
        self.tokens.insert(installation_id, fresh);
        tracing::debug!(installation_id, "minted repository credential");
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        mints: AtomicU32,
        ttl: i64,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn mint(&self, installation_id: i64) -> Result<AccessToken> {
            let n = self.mints.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                secret: format!("tok-{installation_id}-{n}"),
                expires_at: now_ts() + self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn test_reuses_until_margin() {
        let source = Arc::new(CountingSource {
            mints: AtomicU32::new(0),
            ttl: 3600,
        });
        let cache = TokenCache::new(source.clone());

        let first = cache.credential(7).await.unwrap();
        let second = cache.credential(7).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remints_inside_margin() {
        // Tokens expiring within the margin are treated as stale
        let source = Arc::new(CountingSource {
            mints: AtomicU32::new(0),
            ttl: EXPIRY_MARGIN_SECS - 10,
        });
        let cache = TokenCache::new(source.clone());

        cache.credential(7).await.unwrap();
        cache.credential(7).await.unwrap();
        assert_eq!(source.mints.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_per_installation_isolation() {
        let source = Arc::new(CountingSource {
            mints: AtomicU32::new(0),
            ttl: 3600,
        });
        let cache = TokenCache::new(source.clone());

        let a = cache.credential(1).await.unwrap();
        let b = cache.credential(2).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(source.mints.load(Ordering::SeqCst), 2);
    }
}
