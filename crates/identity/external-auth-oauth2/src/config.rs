//! OAuth2 provider configuration types.

use crate::error::{OAuth2Error, OAuth2Result};
use external_auth_core::SettingsMap;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Provider configuration as entered in the host settings.
///
/// Every field tolerates being absent or `null`, so a half-filled settings
/// page still deserializes and is then rejected by [`ProviderConfig::validate`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_secret: String,
    /// Provider host name, e.g. `auth.example.com`
    #[serde(default, deserialize_with = "lenient_string")]
    pub domain: String,
    /// Space separated OAuth2 scopes
    #[serde(default, deserialize_with = "lenient_string")]
    pub scope: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub authorize_path: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token_path: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub identity_path: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub identity_username_field: String,
    /// Accepted and kept, but the forwarded email is always `{username}@{domain}`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub identity_email_field: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub send_identity_token_via_header: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub access_token_param: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub auth_display_name: String,
    /// URL scheme used to reach the provider. Not a host setting.
    #[serde(skip, default = "default_scheme")]
    pub scheme: String,
}

/// The first required setting found missing, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MissingSetting {
    #[error("Did not register external auth because client ID is not set.")]
    ClientId,
    #[error("Did not register external auth because client secret is not set.")]
    ClientSecret,
    #[error("Did not register external auth because domain is not set.")]
    Domain,
    #[error("Did not register external auth because scope is not set.")]
    Scope,
    #[error("Did not register external auth because authorize URL path is not set.")]
    AuthorizePath,
    #[error("Did not register external auth because token URL path is not set.")]
    TokenPath,
    #[error("Did not register external auth because identity URL path is not set.")]
    IdentityPath,
    #[error("Did not register external auth because access token parameter is not set.")]
    AccessTokenParam,
}

impl ProviderConfig {
    /// Names of the host settings a configuration is built from.
    pub const SETTING_NAMES: [&'static str; 12] = [
        "accessTokenParam",
        "authorizePath",
        "clientId",
        "clientSecret",
        "domain",
        "identityPath",
        "sendIdentityTokenViaHeader",
        "identityUsernameField",
        "identityEmailField",
        "scope",
        "tokenPath",
        "authDisplayName",
    ];

    pub fn from_settings(settings: SettingsMap) -> OAuth2Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = settings.into_iter().collect();
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Check completeness, short-circuiting on the first missing field.
    pub fn validate(&self) -> Result<(), MissingSetting> {
        let required = [
            (&self.client_id, MissingSetting::ClientId),
            (&self.client_secret, MissingSetting::ClientSecret),
            (&self.domain, MissingSetting::Domain),
            (&self.scope, MissingSetting::Scope),
            (&self.authorize_path, MissingSetting::AuthorizePath),
            (&self.token_path, MissingSetting::TokenPath),
            (&self.identity_path, MissingSetting::IdentityPath),
        ];

        if let Some((_, missing)) = required.iter().find(|(value, _)| value.trim().is_empty()) {
            return Err(*missing);
        }

        if !self.send_identity_token_via_header && self.access_token_param.trim().is_empty() {
            return Err(MissingSetting::AccessTokenParam);
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    pub fn username_field(&self) -> &str {
        if self.identity_username_field.trim().is_empty() {
            "username"
        } else {
            &self.identity_username_field
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.domain, path)
    }

    pub fn authorization_uri(&self) -> String {
        self.endpoint(&self.authorize_path)
    }

    pub fn access_token_uri(&self) -> String {
        self.endpoint(&self.token_path)
    }

    pub fn identity_uri(&self) -> String {
        self.endpoint(&self.identity_path)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("scope", &self.scope)
            .field("authorize_path", &self.authorize_path)
            .field("token_path", &self.token_path)
            .field("identity_path", &self.identity_path)
            .field("identity_username_field", &self.identity_username_field)
            .field("identity_email_field", &self.identity_email_field)
            .field(
                "send_identity_token_via_header",
                &self.send_identity_token_via_header,
            )
            .field("access_token_param", &self.access_token_param)
            .field("auth_display_name", &self.auth_display_name)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            domain: String::new(),
            scope: String::new(),
            authorize_path: String::new(),
            token_path: String::new(),
            identity_path: String::new(),
            identity_username_field: String::new(),
            identity_email_field: String::new(),
            send_identity_token_via_header: false,
            access_token_param: String::new(),
            auth_display_name: String::new(),
            scheme: default_scheme(),
        }
    }
}

/// Longest accepted lifetime of a pending authorization state.
pub const MAX_STATE_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Runtime options of the plugin itself, independent of the provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOptions {
    /// Plugin identifier used in the callback path (default: auth-oauth2)
    pub plugin_id: String,

    /// Name the provider is registered under (default: oauth2)
    pub auth_name: String,

    /// Login button label until the host provides one (default: OAuth2)
    pub default_display_name: String,

    /// Lifetime of a pending authorization state (default: 600, at most one day)
    pub state_ttl_seconds: u64,

    /// Cap on pending authorization states; the oldest is evicted when full (default: 10000)
    pub max_pending_states: usize,

    /// Timeout applied to token and identity requests (default: 30)
    pub http_timeout_seconds: u64,

    /// Scheme used to reach the provider; `http` is for local development only
    pub provider_scheme: String,

    /// Where users land after any failure
    pub error_redirect: String,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            plugin_id: "auth-oauth2".to_string(),
            auth_name: "oauth2".to_string(),
            default_display_name: "OAuth2".to_string(),
            state_ttl_seconds: 600, // 10 minutes
            max_pending_states: 10_000,
            http_timeout_seconds: 30,
            provider_scheme: default_scheme(),
            error_redirect: "/login?externalAuthError=true".to_string(),
        }
    }
}

impl PluginOptions {
    pub fn validate(&self) -> OAuth2Result<()> {
        if !matches!(self.provider_scheme.as_str(), "https" | "http") {
            return Err(OAuth2Error::ConfigError(format!(
                "unsupported provider scheme '{}'",
                self.provider_scheme
            )));
        }
        if self.state_ttl_seconds == 0 {
            return Err(OAuth2Error::ConfigError(
                "state TTL must be positive".to_string(),
            ));
        }
        if self.state_ttl_seconds > MAX_STATE_TTL_SECONDS {
            return Err(OAuth2Error::ConfigError(format!(
                "state TTL must not exceed {} seconds",
                MAX_STATE_TTL_SECONDS
            )));
        }
        if self.max_pending_states == 0 {
            return Err(OAuth2Error::ConfigError(
                "max pending states must be positive".to_string(),
            ));
        }
        if self.plugin_id.is_empty() || self.auth_name.is_empty() {
            return Err(OAuth2Error::ConfigError(
                "plugin id and auth name must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Callback URL registered with the provider for a given host base URL.
    pub fn redirect_url(&self, webserver_url: &str) -> String {
        format!(
            "{}/plugins/{}/router/callback",
            webserver_url.trim_end_matches('/'),
            self.plugin_id
        )
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Bool(value)) => value,
        Some(serde_json::Value::String(value)) => value.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> SettingsMap {
        serde_json::from_value(value).unwrap()
    }

    fn complete() -> ProviderConfig {
        ProviderConfig::from_settings(settings(json!({
            "clientId": "client",
            "clientSecret": "secret",
            "domain": "auth.example.com",
            "scope": " email openid  profile ",
            "authorizePath": "/oauth2/authorize",
            "tokenPath": "/oauth2/token",
            "identityPath": "/oauth2/userInfo",
            "identityUsernameField": "username",
            "accessTokenParam": "access_token"
        })))
        .unwrap()
    }

    #[test]
    fn test_complete_config_validates() {
        let config = complete();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.scopes(), vec!["email", "openid", "profile"]);
        assert_eq!(
            config.authorization_uri(),
            "https://auth.example.com/oauth2/authorize"
        );
        assert_eq!(config.access_token_uri(), "https://auth.example.com/oauth2/token");
        assert_eq!(config.identity_uri(), "https://auth.example.com/oauth2/userInfo");
    }

    #[test]
    fn test_null_and_missing_values_deserialize() {
        let config = ProviderConfig::from_settings(settings(json!({
            "clientId": null,
            "sendIdentityTokenViaHeader": null
        })))
        .unwrap();

        assert!(config.client_id.is_empty());
        assert!(!config.send_identity_token_via_header);
        assert_eq!(config.validate(), Err(MissingSetting::ClientId));
    }

    #[test]
    fn test_validation_short_circuits_in_order() {
        let mut config = complete();
        config.scope = String::new();
        config.token_path = String::new();
        assert_eq!(config.validate(), Err(MissingSetting::Scope));

        let mut config = complete();
        config.identity_path = "  ".to_string();
        assert_eq!(config.validate(), Err(MissingSetting::IdentityPath));
    }

    #[test]
    fn test_access_token_param_only_required_without_header_mode() {
        let mut config = complete();
        config.access_token_param = String::new();
        assert_eq!(config.validate(), Err(MissingSetting::AccessTokenParam));

        config.send_identity_token_via_header = true;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_blank_access_token_param_is_missing() {
        let mut config = complete();
        config.access_token_param = "  ".to_string();
        assert_eq!(config.validate(), Err(MissingSetting::AccessTokenParam));
    }

    #[test]
    fn test_checkbox_accepts_string_values() {
        let config = ProviderConfig::from_settings(settings(json!({
            "sendIdentityTokenViaHeader": "true"
        })))
        .unwrap();
        assert!(config.send_identity_token_via_header);
    }

    #[test]
    fn test_username_field_falls_back_to_username() {
        let mut config = complete();
        config.identity_username_field = String::new();
        assert_eq!(config.username_field(), "username");

        config.identity_username_field = "preferred_username".to_string();
        assert_eq!(config.username_field(), "preferred_username");
    }

    #[test]
    fn test_debug_redacts_client_secret() {
        let output = format!("{:?}", complete());
        assert!(!output.contains("secret\""));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_redirect_url() {
        let options = PluginOptions::default();
        assert_eq!(
            options.redirect_url("https://videos.example.com/"),
            "https://videos.example.com/plugins/auth-oauth2/router/callback"
        );
    }

    #[test]
    fn test_plugin_options_validation() {
        assert!(PluginOptions::default().validate().is_ok());

        let options = PluginOptions {
            provider_scheme: "ftp".to_string(),
            ..PluginOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OAuth2Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_state_ttl_bounds() {
        let ttl = |state_ttl_seconds: u64| PluginOptions {
            state_ttl_seconds,
            ..PluginOptions::default()
        };

        assert!(ttl(1).validate().is_ok());
        assert!(ttl(MAX_STATE_TTL_SECONDS).validate().is_ok());
        assert!(ttl(0).validate().is_err());
        assert!(ttl(MAX_STATE_TTL_SECONDS + 1).validate().is_err());
        assert!(ttl(u64::MAX).validate().is_err());
    }

    #[test]
    fn test_max_pending_states_must_be_positive() {
        let options = PluginOptions {
            max_pending_states: 0,
            ..PluginOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OAuth2Error::ConfigError(_))
        ));
    }
}
