//! Host pages: login, provider entry points and settings administration.

use crate::host::{InMemoryHost, escape_html};
use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use axum::routing::get;
use external_auth_core::{SettingDescriptor, SettingsMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginQuery {
    #[serde(default)]
    external_auth_error: bool,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    descriptors: Vec<SettingDescriptor>,
    values: SettingsMap,
}

pub fn routes(host: Arc<InMemoryHost>) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/login") }))
        .route("/login", get(login_page))
        .route("/auth/{name}", get(start_external_auth))
        .route("/admin/settings", get(get_settings).post(update_settings))
        .with_state(host)
}

/// Host routes with the plugin router nested under `plugin_prefix`.
pub fn app(host: Arc<InMemoryHost>, plugin_prefix: &str, plugin_router: Router) -> Router {
    routes(host).nest(plugin_prefix, plugin_router)
}

async fn login_page(
    State(host): State<Arc<InMemoryHost>>,
    query: Result<Query<LoginQuery>, QueryRejection>,
) -> Html<String> {
    let query = query.map(|Query(query)| query).unwrap_or_default();

    let mut page = String::from("<!doctype html><html><body><h1>Sign in</h1>");
    if query.external_auth_error {
        page.push_str(r#"<p class="error">External authentication failed. Please try again.</p>"#);
    }

    let options = host.login_options();
    if options.is_empty() {
        page.push_str("<p>No external login is configured.</p>");
    } else {
        page.push_str("<ul>");
        for (name, display_name) in options {
            page.push_str(&format!(
                r#"<li><a href="/auth/{}">Sign in with {}</a></li>"#,
                escape_html(&name),
                escape_html(&display_name)
            ));
        }
        page.push_str("</ul>");
    }
    page.push_str("</body></html>");

    Html(page)
}

async fn start_external_auth(
    State(host): State<Arc<InMemoryHost>>,
    Path(name): Path<String>,
) -> Response {
    match host.auth_request_handler(&name) {
        Some(handler) => handler.on_auth_request().await,
        None => {
            warn!("Login requested for unknown provider {}", name);
            Redirect::to("/login?externalAuthError=true").into_response()
        }
    }
}

async fn get_settings(State(host): State<Arc<InMemoryHost>>) -> Json<SettingsView> {
    Json(SettingsView {
        descriptors: host.descriptors(),
        values: host.settings_snapshot(),
    })
}

async fn update_settings(
    State(host): State<Arc<InMemoryHost>>,
    Json(changes): Json<SettingsMap>,
) -> StatusCode {
    host.update_settings(changes);
    StatusCode::NO_CONTENT
}
