//! Host collaborator traits and types for external authentication providers.
//!
//! An external authentication provider never owns users, sessions or the HTTP
//! server. It talks to its host through the traits defined here: it declares
//! its settings, reads them back, registers itself as a login option and hands
//! every successfully authenticated identity to the host.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Registration error: {0}")]
    Registration(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Setting values keyed by setting name, as stored by the host.
pub type SettingsMap = HashMap<String, serde_json::Value>;

/// Role assigned to a user created through external authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    Administrator = 0,
    Moderator = 1,
    User = 2,
}

impl UserRole {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Identity handed to the host once the provider has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
}

/// Widget used by the host settings UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingType {
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "input-checkbox")]
    InputCheckbox,
}

/// One configuration field declared to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDescriptor {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// Invoked by the host when a user picks this provider on the login page.
#[async_trait]
pub trait AuthRequestHandler: Send + Sync {
    async fn on_auth_request(&self) -> Response;
}

/// Host callback that logs in (or creates) the user behind a confirmed identity.
#[async_trait]
pub trait UserAuthenticated: Send + Sync {
    async fn user_authenticated(&self, headers: &HeaderMap, user: AuthenticatedUser) -> Response;
}

/// Everything the host needs to offer a provider as a login option.
#[derive(Clone)]
pub struct ExternalAuthRegistration {
    pub auth_name: String,
    pub auth_display_name: Arc<dyn Fn() -> String + Send + Sync>,
    pub on_auth_request: Arc<dyn AuthRequestHandler>,
}

impl std::fmt::Debug for ExternalAuthRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAuthRegistration")
            .field("auth_name", &self.auth_name)
            .field("auth_display_name", &(self.auth_display_name)())
            .finish_non_exhaustive()
    }
}

pub trait ExternalAuthRegistry: Send + Sync {
    /// Offer a provider on the login page. The returned callback stays valid
    /// until the provider is unregistered.
    fn register_external_auth(
        &self,
        registration: ExternalAuthRegistration,
    ) -> HostResult<Arc<dyn UserAuthenticated>>;

    fn unregister_external_auth(&self, auth_name: &str);
}

pub trait SettingsRegistry: Send + Sync {
    fn register_setting(&self, descriptor: SettingDescriptor);
}

#[async_trait]
pub trait SettingsManager: Send + Sync {
    async fn get_settings(&self, names: &[&str]) -> HostResult<SettingsMap>;

    async fn get_setting(&self, name: &str) -> HostResult<Option<serde_json::Value>>;

    /// Subscribe to future edits. Each message carries the changed fields.
    fn on_settings_change(&self) -> broadcast::Receiver<SettingsMap>;
}

pub trait HostConfig: Send + Sync {
    /// Public base URL of the host, without a trailing slash.
    fn webserver_url(&self) -> String;
}

/// The collaborators a provider is constructed with.
#[derive(Clone)]
pub struct HostServices {
    pub external_auth: Arc<dyn ExternalAuthRegistry>,
    pub settings: Arc<dyn SettingsManager>,
    pub setting_registry: Arc<dyn SettingsRegistry>,
    pub config: Arc<dyn HostConfig>,
}
