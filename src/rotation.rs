//! Shared account rotation state.
//!
//! One [`AccountRotationState`] is built per process and shared (behind an
//! `Arc`) by every clone of the external client. It holds the index of the
//! active credential and the per-account access token cache.
//!
//! Locks are always taken index first, tokens second.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// An access token and the instant after which it must not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token may still be served at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Active account index plus token cache for a credential pool.
#[derive(Debug)]
pub struct AccountRotationState {
    pool_size: usize,
    index: Mutex<usize>,
    tokens: RwLock<HashMap<usize, CachedToken>>,
}

impl AccountRotationState {
    /// Create state for a pool of `pool_size` accounts starting at
    /// `start_index` (taken modulo the pool size).
    pub fn new(pool_size: usize, start_index: usize) -> Self {
        let start = if pool_size == 0 {
            0
        } else {
            start_index % pool_size
        };

        Self {
            pool_size,
            index: Mutex::new(start),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Upper bound on attempts for one logical operation.
    pub fn max_attempts(&self) -> usize {
        self.pool_size.max(1)
    }

    /// Index of the active account.
    pub async fn current(&self) -> usize {
        *self.index.lock().await
    }

    /// Move to the next account and drop the token of the one being left.
    ///
    /// Returns the new active index.
    pub async fn advance(&self) -> usize {
        let mut index = self.index.lock().await;
        self.advance_locked(&mut index).await
    }

    /// Advance only if `observed` is still the active index.
    ///
    /// Two requests that both saw account `observed` fail rotate once; the
    /// second one simply picks up the account the first moved to.
    pub async fn advance_from(&self, observed: usize) -> usize {
        let mut index = self.index.lock().await;
        if *index != observed {
            debug!(
                observed,
                current = *index,
                "Account already rotated by a concurrent request"
            );
            return *index;
        }
        self.advance_locked(&mut index).await
    }

    async fn advance_locked(&self, index: &mut usize) -> usize {
        let previous = *index;
        if self.pool_size > 0 {
            *index = (previous + 1) % self.pool_size;
        }
        self.tokens.write().await.remove(&previous);
        info!(from = previous, to = *index, "Rotated external API account");
        *index
    }

    /// The cached token for `index`, if one exists and is valid at `now`.
    pub async fn cached_token(&self, index: usize, now: DateTime<Utc>) -> Option<String> {
        self.tokens
            .read()
            .await
            .get(&index)
            .filter(|cached| cached.is_valid_at(now))
            .map(|cached| cached.token.clone())
    }

    /// Store or overwrite the token for `index`.
    pub async fn store_token(&self, index: usize, token: String, expires_at: DateTime<Utc>) {
        self.tokens
            .write()
            .await
            .insert(index, CachedToken { token, expires_at });
    }

    /// Drop the token for `index`, forcing the next call to re-authenticate.
    pub async fn evict_token(&self, index: usize) {
        self.tokens.write().await.remove(&index);
    }

    /// Drop every cached token.
    pub async fn clear_tokens(&self) {
        self.tokens.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_token_served_until_expiry() {
        let state = AccountRotationState::new(2, 0);
        let now = Utc::now();
        let lifetime = Duration::seconds(3600);

        state
            .store_token(0, "tok-0".to_string(), now + lifetime)
            .await;

        assert_eq!(
            state
                .cached_token(0, now + lifetime - Duration::seconds(1))
                .await,
            Some("tok-0".to_string())
        );
        assert_eq!(state.cached_token(0, now + lifetime).await, None);
        assert_eq!(
            state
                .cached_token(0, now + lifetime + Duration::seconds(1))
                .await,
            None
        );
        assert_eq!(state.cached_token(1, now).await, None);
    }

    #[tokio::test]
    async fn test_advance_cycles_back_to_start() {
        let state = AccountRotationState::new(3, 1);
        assert_eq!(state.current().await, 1);

        assert_eq!(state.advance().await, 2);
        assert_eq!(state.advance().await, 0);
        assert_eq!(state.advance().await, 1);
        assert_eq!(state.current().await, 1);
    }

    #[tokio::test]
    async fn test_advance_evicts_previous_account_token() {
        let state = AccountRotationState::new(2, 0);
        let expires = Utc::now() + Duration::hours(1);
        state.store_token(0, "tok-0".to_string(), expires).await;
        state.store_token(1, "tok-1".to_string(), expires).await;

        state.advance().await;

        let now = Utc::now();
        assert_eq!(state.cached_token(0, now).await, None);
        assert_eq!(state.cached_token(1, now).await, Some("tok-1".to_string()));
    }

    #[tokio::test]
    async fn test_start_index_wraps() {
        let state = AccountRotationState::new(3, 7);
        assert_eq!(state.current().await, 1);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let state = AccountRotationState::new(0, 5);
        assert_eq!(state.current().await, 0);
        assert_eq!(state.max_attempts(), 1);
        assert_eq!(state.advance().await, 0);
    }

    #[tokio::test]
    async fn test_advance_from_stale_observation_is_noop() {
        let state = AccountRotationState::new(3, 0);
        assert_eq!(state.advance_from(0).await, 1);
        // A second request that also observed account 0 does not skip account 1.
        assert_eq!(state.advance_from(0).await, 1);
        assert_eq!(state.current().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_advance_from_rotates_once() {
        let state = Arc::new(AccountRotationState::new(4, 0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.advance_from(0).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(state.current().await, 1);
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let state = AccountRotationState::new(2, 0);
        let expires = Utc::now() + Duration::hours(1);
        state.store_token(0, "a".to_string(), expires).await;
        state.store_token(1, "b".to_string(), expires).await;

        state.evict_token(1).await;
        assert_eq!(state.cached_token(1, Utc::now()).await, None);
        assert!(state.cached_token(0, Utc::now()).await.is_some());

        state.clear_tokens().await;
        assert_eq!(state.cached_token(0, Utc::now()).await, None);
    }
}
