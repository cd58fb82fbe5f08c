//! Configuration store shared by the reconfiguration logic and the handlers.

use crate::client::OAuth2Client;
use crate::config::ProviderConfig;
use external_auth_core::UserAuthenticated;
use std::sync::{Arc, RwLock};

/// Immutable snapshot of a successfully configured provider.
pub struct ActiveClient {
    pub config: ProviderConfig,
    pub client: OAuth2Client,
    pub redirect_url: String,
    pub user_authenticated: Arc<dyn UserAuthenticated>,
}

impl std::fmt::Debug for ActiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveClient")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

/// Holds at most one [`ActiveClient`]. Readers clone the `Arc` and never hold
/// the lock across an await; the only writer swaps the whole snapshot.
pub struct ConfigurationStore {
    active: RwLock<Option<Arc<ActiveClient>>>,
    display_name: RwLock<String>,
}

impl ConfigurationStore {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            active: RwLock::new(None),
            display_name: RwLock::new(display_name.into()),
        }
    }

    pub fn current(&self) -> Option<Arc<ActiveClient>> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install a new snapshot (or none) and return the previous one.
    pub fn replace(&self, next: Option<Arc<ActiveClient>>) -> Option<Arc<ActiveClient>> {
        let mut guard = match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    pub fn take(&self) -> Option<Arc<ActiveClient>> {
        self.replace(None)
    }

    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    pub fn display_name(&self) -> String {
        match self.display_name.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        let mut guard = match self.display_name.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use external_auth_core::AuthenticatedUser;

    struct NoopUserAuthenticated;

    #[async_trait]
    impl UserAuthenticated for NoopUserAuthenticated {
        async fn user_authenticated(&self, _headers: &HeaderMap, _user: AuthenticatedUser) -> Response {
            "ok".into_response()
        }
    }

    fn active(client_id: &str) -> Arc<ActiveClient> {
        let config = ProviderConfig {
            client_id: client_id.to_string(),
            client_secret: "secret".to_string(),
            domain: "auth.example.com".to_string(),
            authorize_path: "/authorize".to_string(),
            token_path: "/token".to_string(),
            ..ProviderConfig::default()
        };
        Arc::new(ActiveClient {
            client: OAuth2Client::from_config(&config, 5).unwrap(),
            config,
            redirect_url: "https://host/plugins/auth-oauth2/router/callback".to_string(),
            user_authenticated: Arc::new(NoopUserAuthenticated),
        })
    }

    #[test]
    fn test_replace_returns_previous_snapshot() {
        let store = ConfigurationStore::new("OAuth2");
        assert!(!store.is_configured());

        assert!(store.replace(Some(active("first"))).is_none());
        let previous = store.replace(Some(active("second"))).unwrap();
        assert_eq!(previous.client.client_id(), "first");
        assert_eq!(store.current().unwrap().client.client_id(), "second");

        assert!(store.take().is_some());
        assert!(store.current().is_none());
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let store = ConfigurationStore::new("OAuth2");
        store.replace(Some(active("first")));

        let in_flight = store.current().unwrap();
        store.take();

        assert_eq!(in_flight.client.client_id(), "first");
    }

    #[test]
    fn test_display_name() {
        let store = ConfigurationStore::new("OAuth2");
        assert_eq!(store.display_name(), "OAuth2");
        store.set_display_name("Corporate SSO");
        assert_eq!(store.display_name(), "Corporate SSO");
    }
}
