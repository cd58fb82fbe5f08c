//! Pending authorization states for CSRF protection.
//!
//! Every authorization request gets its own random state value, remembered
//! until the matching callback consumes it or it expires.

use crate::error::{OAuth2Error, OAuth2Result};
use crate::random::generate_state_value;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2State {
    pub state: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OAuth2State {
    pub fn new(redirect_uri: String, ttl_seconds: u64) -> OAuth2Result<Self> {
        let out_of_range =
            || OAuth2Error::ConfigError(format!("state TTL of {} seconds is out of range", ttl_seconds));

        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(out_of_range)?;

        let state = generate_state_value()?;
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(out_of_range)?;

        Ok(Self {
            state,
            redirect_uri,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[async_trait]
pub trait OAuth2StateStore: Send + Sync {
    async fn store(&self, state: OAuth2State) -> OAuth2Result<()>;

    /// Consume a pending state. Unknown, reused and expired values all fail
    /// with [`OAuth2Error::StateNotFound`].
    async fn retrieve(&self, state: &str) -> OAuth2Result<OAuth2State>;

    async fn cleanup_expired(&self) -> OAuth2Result<usize>;
}

/// Default cap on pending states held by [`InMemoryStateStore`].
pub const DEFAULT_MAX_PENDING_STATES: usize = 10_000;

/// Keeps at most `max_pending` states. When full, expired entries are purged
/// first and then the oldest pending state is evicted.
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<String, OAuth2State>>>,
    max_pending: usize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_STATES)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            max_pending: max_pending.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuth2StateStore for InMemoryStateStore {
    async fn store(&self, state: OAuth2State) -> OAuth2Result<()> {
        let mut states = self.states.write().await;

        if states.len() >= self.max_pending && !states.contains_key(&state.state) {
            let now = Utc::now();
            states.retain(|_, pending| now <= pending.expires_at);
        }

        while states.len() >= self.max_pending && !states.contains_key(&state.state) {
            let Some(oldest) = states
                .values()
                .min_by_key(|pending| pending.created_at)
                .map(|pending| pending.state.clone())
            else {
                break;
            };
            states.remove(&oldest);
            warn!("Pending OAuth2 state limit reached, evicted the oldest state");
        }

        states.insert(state.state.clone(), state);
        Ok(())
    }

    async fn retrieve(&self, state: &str) -> OAuth2Result<OAuth2State> {
        let mut states = self.states.write().await;

        let oauth_state = states.remove(state).ok_or(OAuth2Error::StateNotFound)?;

        if oauth_state.is_expired() {
            return Err(OAuth2Error::StateNotFound);
        }

        Ok(oauth_state)
    }

    async fn cleanup_expired(&self) -> OAuth2Result<usize> {
        let mut states = self.states.write().await;
        let before = states.len();
        let now = Utc::now();
        states.retain(|_, state| now <= state.expires_at);
        Ok(before - states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "https://videos.example.com/plugins/auth-oauth2/router/callback";

    #[tokio::test]
    async fn test_state_is_single_use() {
        let store = InMemoryStateStore::new();
        let state = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        let state_param = state.state.clone();

        store.store(state).await.unwrap();

        let retrieved = store.retrieve(&state_param).await.unwrap();
        assert_eq!(retrieved.redirect_uri, CALLBACK);

        let result = store.retrieve(&state_param).await;
        assert!(matches!(result, Err(OAuth2Error::StateNotFound)));
    }

    #[tokio::test]
    async fn test_unknown_state_is_rejected() {
        let store = InMemoryStateStore::new();
        store
            .store(OAuth2State::new(CALLBACK.to_string(), 300).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            store.retrieve("forged").await,
            Err(OAuth2Error::StateNotFound)
        ));
        assert!(matches!(
            store.retrieve("").await,
            Err(OAuth2Error::StateNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_state_is_rejected_and_cleaned_up() {
        let store = InMemoryStateStore::new();

        let mut expired = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        expired.expires_at = Utc::now() - Duration::minutes(1);
        let fresh = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();

        store.store(expired.clone()).await.unwrap();
        store.store(fresh).await.unwrap();

        let cleaned = store.cleanup_expired().await.unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(store.len().await, 1);

        store.store(expired.clone()).await.unwrap();
        let result = store.retrieve(&expired.state).await;
        assert!(matches!(result, Err(OAuth2Error::StateNotFound)));
    }

    #[tokio::test]
    async fn test_store_is_capped() {
        let store = InMemoryStateStore::with_max_pending(3);

        let mut created = Vec::new();
        for offset in 0..5 {
            let mut state = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
            state.created_at = Utc::now() + Duration::seconds(offset);
            created.push(state.state.clone());
            store.store(state).await.unwrap();
        }

        assert_eq!(store.len().await, 3);
        for evicted in &created[..2] {
            assert!(store.retrieve(evicted).await.is_err());
        }
        for kept in &created[2..] {
            assert!(store.retrieve(kept).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_full_store_drops_expired_states_first() {
        let store = InMemoryStateStore::with_max_pending(2);

        let mut expired = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        expired.created_at = Utc::now() + Duration::minutes(5);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        let oldest_live = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        let newcomer = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();

        store.store(expired).await.unwrap();
        store.store(oldest_live.clone()).await.unwrap();
        store.store(newcomer.clone()).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.retrieve(&oldest_live.state).await.is_ok());
        assert!(store.retrieve(&newcomer.state).await.is_ok());
    }

    #[test]
    fn test_out_of_range_ttl_is_an_error() {
        for ttl in [u64::MAX, 100_000_000_000_000_000] {
            assert!(matches!(
                OAuth2State::new(CALLBACK.to_string(), ttl),
                Err(OAuth2Error::ConfigError(_))
            ));
        }

        let day = OAuth2State::new(CALLBACK.to_string(), 86_400).unwrap();
        assert!(!day.is_expired());
        assert_eq!((day.expires_at - day.created_at).num_seconds(), 86_400);
    }

    #[test]
    fn test_each_state_is_fresh() {
        let first = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        let second = OAuth2State::new(CALLBACK.to_string(), 300).unwrap();
        assert_ne!(first.state, second.state);
        assert_eq!(first.state.len(), 32);
    }
}
