//! OAuth2 login host
//!
//! Runs the OAuth2 login provider inside an in-memory host:
//! - `/login` lists the available login options
//! - `/auth/{name}` starts an external login
//! - `/admin/settings` reads and edits the provider settings
//! - `/plugins/{plugin_id}/router/callback` receives the provider redirect

use anyhow::{Context, Result};
use external_auth_oauth2::OAuth2Plugin;
use oauth2_login_host::{Config, InMemoryHost, app};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load_logged()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    let initial = config.provider.to_settings_map()?;
    let host = Arc::new(InMemoryHost::new(config.webserver_url(), initial));

    let (plugin, plugin_router) = OAuth2Plugin::register(host.services(), config.plugin.clone())
        .await
        .context("Failed to register the OAuth2 plugin")?;

    let app = app(host.clone(), &config.plugin_router_prefix(), plugin_router);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("OAuth2 login host listening on {}", addr);
    info!(
        "Provider callback URL: {}",
        config.plugin.redirect_url(&config.webserver_url())
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    plugin.unregister().await;
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
