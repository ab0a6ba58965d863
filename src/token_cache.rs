//! Installation token cache.
//!
//! Keyed by installation id. Entries are checked for expiry when read: a
//! token that expires within the caller's TTL buffer counts as stale and is
//! replaced by awaiting the refresh callback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use gitvault_core::VaultResult;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedToken {
    token: String,
    /// Unix seconds; `None` never expires.
    expires_at: Option<i64>,
}

impl CachedToken {
    fn fresh_at(&self, now: i64, ttl_buffer: i64) -> bool {
        match self.expires_at {
            None => true,
            Some(exp) => exp - ttl_buffer > now,
        }
    }

    fn outlives(&self, other: &CachedToken) -> bool {
        match (self.expires_at, other.expires_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a > b,
        }
    }
}

#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedToken>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a token seen on a request unless the cached one lives longer.
    pub fn offer(&self, key: &str, token: &str, expires_at: Option<i64>) {
        let candidate = CachedToken {
            token: token.to_string(),
            expires_at,
        };
        let mut entries = self.lock();
        match entries.get(key) {
            Some(existing) if !candidate.outlives(existing) && existing.token != token => {}
            _ => {
                entries.insert(key.to_string(), candidate);
            }
        }
    }

    /// Cached token for `key`, or the result of `refresh` when the cached one
    /// is missing or expires within `ttl_buffer` seconds.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        key: &str,
        ttl_buffer: i64,
        refresh: F,
    ) -> VaultResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VaultResult<(String, Option<i64>)>>,
    {
        self.get_or_refresh_at(chrono::Utc::now().timestamp(), key, ttl_buffer, refresh)
            .await
    }

    pub async fn get_or_refresh_at<F, Fut>(
        &self,
        now: i64,
        key: &str,
        ttl_buffer: i64,
        refresh: F,
    ) -> VaultResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VaultResult<(String, Option<i64>)>>,
    {
        let cached = self.lock().get(key).cloned();
        if let Some(cached) = cached {
            if cached.fresh_at(now, ttl_buffer) {
                return Ok(cached.token);
            }
        }

        let (token, expires_at) = refresh().await?;
        tracing::debug!(installation = key, "refreshed installation token");
        self.lock().insert(
            key.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at,
            },
        );
        Ok(token)
    }
}
