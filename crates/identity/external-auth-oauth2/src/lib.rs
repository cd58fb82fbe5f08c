//! OAuth2 Authorization Code login provider.
//!
//! This crate lets an external OAuth2 identity provider authenticate users for
//! a host application. It declares its settings to the host, builds a client
//! once those settings are complete, redirects users to the provider, and on
//! the callback exchanges the code for an access token, fetches the user's
//! identity and hands it to the host through the `external-auth-core` traits.
//!
//! Every authorization request carries its own single-use state value.

mod client;
mod config;
mod error;
mod handlers;
mod identity;
mod plugin;
mod random;
mod settings;
mod state;
mod store;
mod types;


pub use client::OAuth2Client;
pub use config::{MAX_STATE_TTL_SECONDS, MissingSetting, PluginOptions, ProviderConfig};
pub use error::{OAuth2Error, OAuth2Result};
pub use handlers::{AuthFlow, router};
pub use identity::{IdentityRequest, fetch_identity, identity_request, map_identity};
pub use plugin::OAuth2Plugin;
pub use random::{STATE_BYTES, generate_random_bytes, generate_state_value};
pub use settings::setting_descriptors;
pub use state::{DEFAULT_MAX_PENDING_STATES, InMemoryStateStore, OAuth2State, OAuth2StateStore};
pub use store::{ActiveClient, ConfigurationStore};
pub use types::{CallbackQuery, TokenResponse};

// Re-export common types for convenience
pub use external_auth_core::{AuthenticatedUser, HostServices, UserRole};
