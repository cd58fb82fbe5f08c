//! Plugin lifecycle: settings registration, (re)configuration and teardown.

use crate::client::OAuth2Client;
use crate::config::{PluginOptions, ProviderConfig};
use crate::error::OAuth2Result;
use crate::handlers::{self, AuthFlow};
use crate::random::{STATE_BYTES, generate_random_bytes};
use crate::settings::setting_descriptors;
use crate::state::{InMemoryStateStore, OAuth2StateStore};
use crate::store::{ActiveClient, ConfigurationStore};
use axum::Router;
use external_auth_core::{ExternalAuthRegistration, HostServices, SettingsMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DISPLAY_NAME_SETTING: &str = "authDisplayName";

pub struct OAuth2Plugin {
    host: HostServices,
    options: PluginOptions,
    store: Arc<ConfigurationStore>,
    states: Arc<dyn OAuth2StateStore>,
    flow: Arc<AuthFlow>,
    reconfigure_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OAuth2Plugin {
    pub fn new(host: HostServices, options: PluginOptions) -> OAuth2Result<Self> {
        let states = Arc::new(InMemoryStateStore::with_max_pending(
            options.max_pending_states,
        ));
        Self::with_state_store(host, options, states)
    }

    pub fn with_state_store(
        host: HostServices,
        options: PluginOptions,
        states: Arc<dyn OAuth2StateStore>,
    ) -> OAuth2Result<Self> {
        options.validate()?;

        let store = Arc::new(ConfigurationStore::new(options.default_display_name.clone()));
        let flow = Arc::new(AuthFlow::new(store.clone(), states.clone(), &options));

        Ok(Self {
            host,
            options,
            store,
            states,
            flow,
            reconfigure_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Declare the settings, load the current configuration and start
    /// listening for changes. The returned router belongs under the host's
    /// plugin router prefix.
    ///
    /// Fails only when the plugin cannot run safely at all: invalid options or
    /// no secure random source.
    pub async fn register(
        host: HostServices,
        options: PluginOptions,
    ) -> OAuth2Result<(Arc<Self>, Router)> {
        let plugin = Arc::new(Self::new(host, options)?);

        for descriptor in setting_descriptors() {
            plugin.host.setting_registry.register_setting(descriptor);
        }

        let router = handlers::router(plugin.flow.clone());

        generate_random_bytes(STATE_BYTES)?;

        if let Err(e) = plugin.reconfigure().await {
            debug!(err = %e, "Cannot load settings and create client");
        }
        plugin.load_display_name().await;

        plugin.spawn_settings_listener();
        plugin.spawn_state_cleanup();

        Ok((plugin, router))
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    pub fn flow(&self) -> &Arc<AuthFlow> {
        &self.flow
    }

    /// Tear down the current provider, then install a new one if the settings
    /// are complete. Incomplete settings leave external auth disabled.
    pub async fn reconfigure(&self) -> OAuth2Result<()> {
        let _guard = self.reconfigure_lock.lock().await;

        if self.store.take().is_some() {
            self.host
                .external_auth
                .unregister_external_auth(&self.options.auth_name);
            debug!("Unregistered external auth {}", self.options.auth_name);
        }

        let settings = self
            .host
            .settings
            .get_settings(&ProviderConfig::SETTING_NAMES)
            .await?;
        let mut config =
            ProviderConfig::from_settings(settings)?.with_scheme(self.options.provider_scheme.clone());

        if let Err(missing) = config.validate() {
            info!("{}", missing);
            return Ok(());
        }

        config.scope = config.scope.trim().to_string();
        let redirect_url = self.options.redirect_url(&self.host.config.webserver_url());
        let client = OAuth2Client::from_config(&config, self.options.http_timeout_seconds)?;

        let store = self.store.clone();
        let auth_display_name: Arc<dyn Fn() -> String + Send + Sync> =
            Arc::new(move || store.display_name());
        let registration = ExternalAuthRegistration {
            auth_name: self.options.auth_name.clone(),
            auth_display_name,
            on_auth_request: self.flow.clone(),
        };
        let user_authenticated = self
            .host
            .external_auth
            .register_external_auth(registration)?;

        info!(
            "Registered external auth {} against {}",
            self.options.auth_name, config.domain
        );

        self.store.replace(Some(Arc::new(ActiveClient {
            config,
            client,
            redirect_url,
            user_authenticated,
        })));

        Ok(())
    }

    async fn load_display_name(&self) {
        match self.host.settings.get_setting(DISPLAY_NAME_SETTING).await {
            Ok(Some(value)) => {
                if let Some(name) = value.as_str().filter(|name| !name.is_empty()) {
                    self.store.set_display_name(name);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(err = %e, "Cannot read display name setting"),
        }
    }

    async fn on_settings_change(&self, changed: &SettingsMap) {
        if let Err(e) = self.reconfigure().await {
            error!(err = %e, "Cannot load settings and create client after settings changes.");
        }

        if let Some(name) = changed
            .get(DISPLAY_NAME_SETTING)
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
        {
            self.store.set_display_name(name);
        }
    }

    fn spawn_settings_listener(self: &Arc<Self>) {
        let mut changes = self.host.settings.on_settings_change();
        let plugin: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let received = changes.recv().await;
                let Some(plugin) = plugin.upgrade() else {
                    break;
                };
                match received {
                    Ok(changed) => plugin.on_settings_change(&changed).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} settings changes, reloading", skipped);
                        plugin.on_settings_change(&SettingsMap::new()).await;
                        plugin.load_display_name().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.track(handle);
    }

    fn spawn_state_cleanup(&self) {
        let states = self.states.clone();
        let period = Duration::from_secs(self.options.state_ttl_seconds);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match states.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(count) => debug!("Removed {} expired OAuth2 states", count),
                    Err(e) => warn!(err = %e, "OAuth2 state cleanup failed"),
                }
            }
        });

        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    /// Stop background tasks and withdraw the provider from the host.
    pub async fn unregister(&self) {
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            handle.abort();
        }

        let _guard = self.reconfigure_lock.lock().await;
        if self.store.take().is_some() {
            self.host
                .external_auth
                .unregister_external_auth(&self.options.auth_name);
            info!("Unregistered external auth {}", self.options.auth_name);
        }
    }
}

impl Drop for OAuth2Plugin {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}
