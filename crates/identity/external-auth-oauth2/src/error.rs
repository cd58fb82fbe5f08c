//! OAuth2 error types.

use thiserror::Error;

pub type OAuth2Result<T> = Result<T, OAuth2Error>;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Secure random source unavailable: {0}")]
    Entropy(#[from] rand::Error),

    #[error("No OAuth2 client is configured")]
    NotConfigured,

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("State not found or expired")]
    StateNotFound,

    #[error("Missing callback parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("User info request failed: {0}")]
    UserInfoFailed(String),

    #[error("Invalid user info response: {0}")]
    InvalidUserInfoResponse(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Host error: {0}")]
    HostError(#[from] external_auth_core::HostError),

    #[error("Callback error: {0}")]
    CallbackError(String),
}
