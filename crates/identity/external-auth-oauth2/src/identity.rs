//! Identity endpoint request and mapping into the host's user record.

use crate::config::ProviderConfig;
use crate::error::{OAuth2Error, OAuth2Result};
use external_auth_core::{AuthenticatedUser, UserRole};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

/// How the access token travels to the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    pub url: Url,
    /// Set when the token goes in an `Authorization: Bearer` header.
    pub bearer: Option<String>,
}

pub fn identity_request(config: &ProviderConfig, access_token: &str) -> OAuth2Result<IdentityRequest> {
    let mut url = Url::parse(&config.identity_uri())?;

    if config.send_identity_token_via_header {
        return Ok(IdentityRequest {
            url,
            bearer: Some(access_token.to_string()),
        });
    }

    url.query_pairs_mut()
        .append_pair(&config.access_token_param, access_token);

    Ok(IdentityRequest { url, bearer: None })
}

pub async fn fetch_identity(http_client: &Client, request: IdentityRequest) -> OAuth2Result<Value> {
    let mut builder = http_client.get(request.url);
    if let Some(token) = &request.bearer {
        builder = builder.bearer_auth(token);
    }

    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        error!("User info request failed with {}: {}", status, error_text);
        return Err(OAuth2Error::UserInfoFailed(format!(
            "{}: {}",
            status, error_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| OAuth2Error::InvalidUserInfoResponse(e.to_string()))
}

/// Map an identity payload to the user handed to the host.
///
/// The email is always synthesized from the username and provider domain;
/// `identityEmailField` is not consulted.
pub fn map_identity(config: &ProviderConfig, identity: &Value) -> OAuth2Result<AuthenticatedUser> {
    let field = config.username_field();

    let username = match identity.get(field) {
        Some(Value::String(value)) if !value.is_empty() => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        _ => {
            return Err(OAuth2Error::InvalidUserInfoResponse(format!(
                "identity field '{}' missing or not a string",
                field
            )));
        }
    };

    debug!("Mapped identity for user {}", username);

    Ok(AuthenticatedUser {
        email: format!("{}@{}", username, config.domain),
        display_name: username.clone(),
        username,
        role: UserRole::User,
    })
}
