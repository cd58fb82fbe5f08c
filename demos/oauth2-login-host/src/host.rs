//! In-memory implementation of the host collaborator traits.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::{Html, IntoResponse, Response};
use external_auth_core::{
    AuthRequestHandler, AuthenticatedUser, ExternalAuthRegistration, ExternalAuthRegistry,
    HostConfig, HostError, HostResult, HostServices, SettingDescriptor, SettingsManager,
    SettingsMap, SettingsRegistry, UserAuthenticated,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

const SETTINGS_CHANNEL_CAPACITY: usize = 16;

/// Users created or updated by external logins, keyed by username.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, AuthenticatedUser>>,
}

impl UserDirectory {
    pub fn get(&self, username: &str) -> Option<AuthenticatedUser> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserAuthenticated for UserDirectory {
    async fn user_authenticated(&self, headers: &HeaderMap, user: AuthenticatedUser) -> Response {
        let agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown agent");
        info!("Logging in {} ({})", user.username, agent);

        let page = format!(
            "<!doctype html><html><body><h1>Welcome, {}</h1><p>Signed in as {}.</p></body></html>",
            escape_html(&user.display_name),
            escape_html(&user.email)
        );

        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.username.clone(), user);

        Html(page).into_response()
    }
}

/// Host state: settings, declared descriptors, registered providers and users.
pub struct InMemoryHost {
    webserver_url: String,
    settings: RwLock<SettingsMap>,
    descriptors: RwLock<Vec<SettingDescriptor>>,
    providers: RwLock<HashMap<String, ExternalAuthRegistration>>,
    changes: broadcast::Sender<SettingsMap>,
    users: Arc<UserDirectory>,
}

impl InMemoryHost {
    pub fn new(webserver_url: impl Into<String>, initial: SettingsMap) -> Self {
        let (changes, _) = broadcast::channel(SETTINGS_CHANNEL_CAPACITY);
        Self {
            webserver_url: webserver_url.into(),
            settings: RwLock::new(initial),
            descriptors: RwLock::new(Vec::new()),
            providers: RwLock::new(HashMap::new()),
            changes,
            users: Arc::new(UserDirectory::default()),
        }
    }

    pub fn services(self: &Arc<Self>) -> HostServices {
        HostServices {
            external_auth: self.clone(),
            settings: self.clone(),
            setting_registry: self.clone(),
            config: self.clone(),
        }
    }

    pub fn users(&self) -> &Arc<UserDirectory> {
        &self.users
    }

    pub fn descriptors(&self) -> Vec<SettingDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings_snapshot(&self) -> SettingsMap {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `changes` into the stored settings and notify subscribers.
    pub fn update_settings(&self, changes: SettingsMap) {
        {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            for (name, value) in &changes {
                settings.insert(name.clone(), value.clone());
            }
        }

        match self.changes.send(changes) {
            Ok(receivers) => debug!("Settings change sent to {} subscribers", receivers),
            Err(_) => debug!("Settings changed with no subscribers"),
        }
    }

    /// Registered login options as `(auth name, display name)`, sorted by name.
    pub fn login_options(&self) -> Vec<(String, String)> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let mut options: Vec<(String, String)> = providers
            .values()
            .map(|registration| {
                (
                    registration.auth_name.clone(),
                    (registration.auth_display_name)(),
                )
            })
            .collect();
        options.sort();
        options
    }

    pub fn auth_request_handler(&self, auth_name: &str) -> Option<Arc<dyn AuthRequestHandler>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(auth_name)
            .map(|registration| registration.on_auth_request.clone())
    }
}

impl ExternalAuthRegistry for InMemoryHost {
    fn register_external_auth(
        &self,
        registration: ExternalAuthRegistration,
    ) -> HostResult<Arc<dyn UserAuthenticated>> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&registration.auth_name) {
            return Err(HostError::Registration(format!(
                "{} is already registered",
                registration.auth_name
            )));
        }

        info!("Login option {} is now available", registration.auth_name);
        providers.insert(registration.auth_name.clone(), registration);

        let users: Arc<dyn UserAuthenticated> = self.users.clone();
        Ok(users)
    }

    fn unregister_external_auth(&self, auth_name: &str) {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(auth_name);
        if removed.is_some() {
            info!("Login option {} was withdrawn", auth_name);
        }
    }
}

impl SettingsRegistry for InMemoryHost {
    fn register_setting(&self, descriptor: SettingDescriptor) {
        if let Some(default) = &descriptor.default {
            self.settings
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(descriptor.name.clone())
                .or_insert_with(|| default.clone());
        }

        let mut descriptors = self.descriptors.write().unwrap_or_else(PoisonError::into_inner);
        descriptors.retain(|existing| existing.name != descriptor.name);
        descriptors.push(descriptor);
    }
}

#[async_trait]
impl SettingsManager for InMemoryHost {
    async fn get_settings(&self, names: &[&str]) -> HostResult<SettingsMap> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        Ok(names
            .iter()
            .filter_map(|name| {
                settings
                    .get(*name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect())
    }

    async fn get_setting(&self, name: &str) -> HostResult<Option<serde_json::Value>> {
        Ok(self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    fn on_settings_change(&self) -> broadcast::Receiver<SettingsMap> {
        self.changes.subscribe()
    }
}

impl HostConfig for InMemoryHost {
    fn webserver_url(&self) -> String {
        self.webserver_url.clone()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
