//! Configuration for the OAuth2 login host
//!
//! Sources, later ones winning:
//! - Default values
//! - Configuration file (config.toml, or the path in OAUTH2_HOST_CONFIG_FILE)
//! - Environment variables with the OAUTH2_HOST prefix
//!
//! The `provider` section only seeds the host's settings store. Once the host
//! is running, provider settings are edited through `/admin/settings`.

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use external_auth_core::SettingsMap;
use external_auth_oauth2::PluginOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main configuration struct for the login host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// OAuth2 plugin runtime options
    pub plugin: PluginOptions,

    /// Initial provider settings
    pub provider: ProviderSettings,
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind to (default: 9000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL, used to build the provider callback URL
    #[serde(default = "default_webserver_url")]
    pub webserver_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Provider settings as written in config files. Serialized with the
/// camelCase names the plugin reads from the settings store.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct ProviderSettings {
    pub auth_display_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub domain: String,
    pub scope: String,
    pub authorize_path: String,
    pub token_path: String,
    pub identity_path: String,
    pub identity_username_field: String,
    pub identity_email_field: String,
    pub send_identity_token_via_header: bool,
    pub access_token_param: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl ProviderSettings {
    /// Settings entries to seed the store with. Empty strings are left out so
    /// the store keeps reporting them as unset.
    pub fn to_settings_map(&self) -> Result<SettingsMap> {
        let value = serde_json::to_value(self).context("Failed to serialize provider settings")?;
        let map: SettingsMap =
            serde_json::from_value(value).context("Provider settings are not an object")?;

        Ok(map
            .into_iter()
            .filter(|(_, value)| value.as_str().is_none_or(|text| !text.is_empty()))
            .collect())
    }
}

// Default value functions
fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    9000
}

fn default_webserver_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webserver_url: default_webserver_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_path =
            std::env::var("OAUTH2_HOST_CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            info!("Loading configuration from {}", config_path);
            builder = builder.add_source(File::with_name(&config_path));
        } else {
            debug!("No config file found at {}, using defaults", config_path);
        }

        // e.g. OAUTH2_HOST__SERVER__PORT, OAUTH2_HOST__PROVIDER__CLIENT_ID
        builder = builder.add_source(
            Environment::with_prefix("OAUTH2_HOST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut settings: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Like [`Config::load`], with a temporary subscriber so the loading
    /// messages are printed before the configured one is installed.
    pub fn load_logged() -> Result<Self> {
        tracing::subscriber::with_default(bootstrap_subscriber(), Self::load)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            info!("Using PORT environment variable");
            self.server.port = port.parse().context("Invalid PORT value")?;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            info!("Using RUST_LOG environment variable");
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        let webserver_url = url::Url::parse(&self.server.webserver_url)
            .with_context(|| format!("Invalid webserver URL '{}'", self.server.webserver_url))?;
        if !matches!(webserver_url.scheme(), "http" | "https") {
            anyhow::bail!("Webserver URL must use http or https");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        self.plugin
            .validate()
            .context("Invalid plugin configuration")?;

        Ok(())
    }

    /// Get the socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Public base URL without a trailing slash
    pub fn webserver_url(&self) -> String {
        self.server.webserver_url.trim_end_matches('/').to_string()
    }

    /// Prefix the plugin router is nested under
    pub fn plugin_router_prefix(&self) -> String {
        format!("/plugins/{}/router", self.plugin.plugin_id)
    }

    /// Get log filter string for tracing
    pub fn log_filter(&self) -> String {
        format!(
            "oauth2_login_host={},external_auth_oauth2={}",
            self.logging.level, self.logging.level
        )
    }
}

/// Subscriber used while the configuration itself is loading. Honours
/// `RUST_LOG`, otherwise logs this crate at the default level.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("oauth2_login_host={}", default_log_level())));

    tracing_subscriber::fmt().with_env_filter(filter).finish()
}
