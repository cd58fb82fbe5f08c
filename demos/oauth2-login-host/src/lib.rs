//! A minimal host application for the OAuth2 login provider.
//!
//! Keeps settings, registered login options and users in memory and serves a
//! login page, an entry point per provider and a settings endpoint.

pub mod config;
pub mod host;
pub mod routes;

pub use config::Config;
pub use host::{InMemoryHost, UserDirectory};
pub use routes::{app, routes};
