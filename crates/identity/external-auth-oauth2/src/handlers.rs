//! Authorization request and callback handling.

use crate::config::PluginOptions;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::identity::{fetch_identity, identity_request, map_identity};
use crate::state::{OAuth2State, OAuth2StateStore};
use crate::store::ConfigurationStore;
use crate::types::CallbackQuery;
use async_trait::async_trait;
use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use external_auth_core::AuthRequestHandler;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Where in the callback a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Guard,
    Exchange,
    Identity,
}

#[derive(Debug)]
struct CallbackFailure {
    stage: Stage,
    source: OAuth2Error,
}

fn at(stage: Stage) -> impl FnOnce(OAuth2Error) -> CallbackFailure {
    move |source| CallbackFailure { stage, source }
}

/// Drives both ends of the Authorization Code flow against the active client.
pub struct AuthFlow {
    store: Arc<ConfigurationStore>,
    states: Arc<dyn OAuth2StateStore>,
    state_ttl_seconds: u64,
    error_redirect: String,
}

impl AuthFlow {
    pub fn new(
        store: Arc<ConfigurationStore>,
        states: Arc<dyn OAuth2StateStore>,
        options: &PluginOptions,
    ) -> Self {
        Self {
            store,
            states,
            state_ttl_seconds: options.state_ttl_seconds,
            error_redirect: options.error_redirect.clone(),
        }
    }

    pub fn redirect_on_error(&self) -> Response {
        Redirect::to(&self.error_redirect).into_response()
    }

    /// Mint a fresh state and build the provider authorization URL.
    pub async fn authorization_redirect(&self) -> OAuth2Result<Url> {
        let active = self.store.current().ok_or(OAuth2Error::NotConfigured)?;

        let pending = OAuth2State::new(active.redirect_url.clone(), self.state_ttl_seconds)?;
        let url = active.client.authorization_url(
            &active.redirect_url,
            &active.config.scopes(),
            &pending.state,
        )?;
        self.states.store(pending).await?;

        Ok(url)
    }

    pub async fn handle_callback(&self, headers: &HeaderMap, query: CallbackQuery) -> Response {
        match self.complete_login(headers, query).await {
            Ok(response) => response,
            Err(CallbackFailure { stage, source }) => {
                match stage {
                    Stage::Guard => error!("Rejected OAuth2 callback: {}", source),
                    Stage::Exchange => error!(err = %source, "Access token error."),
                    Stage::Identity => error!(err = %source, "Identity request failed."),
                }
                self.redirect_on_error()
            }
        }
    }

    async fn complete_login(
        &self,
        headers: &HeaderMap,
        query: CallbackQuery,
    ) -> Result<Response, CallbackFailure> {
        let active = self
            .store
            .current()
            .ok_or(OAuth2Error::NotConfigured)
            .map_err(at(Stage::Guard))?;

        if let Some(provider_error) = &query.error {
            let description = query
                .error_description
                .as_deref()
                .unwrap_or("No description");
            return Err(CallbackFailure {
                stage: Stage::Guard,
                source: OAuth2Error::CallbackError(format!("{}: {}", provider_error, description)),
            });
        }

        let code = query
            .code
            .filter(|code| !code.is_empty())
            .ok_or(OAuth2Error::MissingParameter("code"))
            .map_err(at(Stage::Guard))?;

        let state = query
            .state
            .filter(|state| !state.is_empty())
            .ok_or(OAuth2Error::MissingParameter("state"))
            .map_err(at(Stage::Guard))?;

        let pending = self
            .states
            .retrieve(&state)
            .await
            .map_err(|_| OAuth2Error::InvalidState)
            .map_err(at(Stage::Guard))?;

        if pending.redirect_uri.is_empty() {
            return Err(CallbackFailure {
                stage: Stage::Guard,
                source: OAuth2Error::ConfigError("redirect URL is not configured".to_string()),
            });
        }

        let token = active
            .client
            .exchange_code(&code, &pending.redirect_uri)
            .await
            .map_err(at(Stage::Exchange))?;

        let request =
            identity_request(&active.config, &token.access_token).map_err(at(Stage::Identity))?;
        let identity = fetch_identity(active.client.http_client(), request)
            .await
            .map_err(at(Stage::Identity))?;
        let user = map_identity(&active.config, &identity).map_err(at(Stage::Identity))?;

        info!("OAuth2 login succeeded for {}", user.username);
        Ok(active.user_authenticated.user_authenticated(headers, user).await)
    }
}

#[async_trait]
impl AuthRequestHandler for AuthFlow {
    async fn on_auth_request(&self) -> Response {
        match self.authorization_redirect().await {
            Ok(url) => Redirect::to(url.as_str()).into_response(),
            Err(e) => {
                error!(err = %e, "Cannot handle auth request.");
                self.redirect_on_error()
            }
        }
    }
}

/// Routes mounted by the host under the plugin router prefix.
pub fn router(flow: Arc<AuthFlow>) -> Router {
    Router::new()
        .route("/callback", get(callback_handler))
        .with_state(flow)
}

async fn callback_handler(
    State(flow): State<Arc<AuthFlow>>,
    headers: HeaderMap,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => flow.handle_callback(&headers, query).await,
        Err(rejection) => {
            error!("Malformed OAuth2 callback query: {}", rejection);
            flow.redirect_on_error()
        }
    }
}
