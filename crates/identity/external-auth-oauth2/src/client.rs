//! OAuth2 client bound to one provider's authorization and token endpoints.

use crate::config::ProviderConfig;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::TokenResponse;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

#[derive(Clone)]
pub struct OAuth2Client {
    http_client: Client,
    client_id: String,
    client_secret: String,
    authorization_uri: Url,
    access_token_uri: Url,
}

impl OAuth2Client {
    pub fn new(
        client_id: String,
        client_secret: String,
        authorization_uri: &str,
        access_token_uri: &str,
        http_timeout_seconds: u64,
    ) -> OAuth2Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(http_timeout_seconds))
            .build()?;

        Ok(Self {
            http_client,
            client_id,
            client_secret,
            authorization_uri: Url::parse(authorization_uri)?,
            access_token_uri: Url::parse(access_token_uri)?,
        })
    }

    pub fn from_config(config: &ProviderConfig, http_timeout_seconds: u64) -> OAuth2Result<Self> {
        Self::new(
            config.client_id.clone(),
            config.client_secret.clone(),
            &config.authorization_uri(),
            &config.access_token_uri(),
            http_timeout_seconds,
        )
    }

    /// Shared HTTP client, reused for the identity request.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn authorization_uri(&self) -> &Url {
        &self.authorization_uri
    }

    pub fn access_token_uri(&self) -> &Url {
        &self.access_token_uri
    }

    /// Build the URL the user agent is redirected to.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
    ) -> OAuth2Result<Url> {
        let mut url = self.authorization_uri.clone();

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("response_type", "code")
            .append_pair("state", state);

        debug!("Generated authorization URL for {}", self.authorization_uri);
        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// A confidential client authenticates with HTTP Basic; a public client
    /// (empty secret) identifies itself with `client_id` in the form body.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> OAuth2Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let mut request = self
            .http_client
            .post(self.access_token_uri.clone())
            .header(reqwest::header::ACCEPT, "application/json");

        if self.client_secret.is_empty() {
            params.push(("client_id", self.client_id.as_str()));
        } else {
            request = request.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        let response = request.form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Token exchange failed with {}: {}", status, error_text);
            return Err(OAuth2Error::TokenExchangeFailed(format!(
                "{}: {}",
                status, error_text
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuth2Error::InvalidTokenResponse(e.to_string()))?;

        if token_response.access_token.is_empty() {
            return Err(OAuth2Error::InvalidTokenResponse(
                "empty access token".to_string(),
            ));
        }

        info!("Successfully exchanged code for tokens");
        Ok(token_response)
    }
}

impl std::fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.client_id)
            .field("authorization_uri", &self.authorization_uri.as_str())
            .field("access_token_uri", &self.access_token_uri.as_str())
            .finish_non_exhaustive()
    }
}
