//! Settings the provider declares to the host settings UI.

use external_auth_core::{SettingDescriptor, SettingType};
use serde_json::Value;

fn input(name: &str, label: &str, default: Option<&str>) -> SettingDescriptor {
    SettingDescriptor {
        name: name.to_string(),
        label: label.to_string(),
        setting_type: SettingType::Input,
        private: true,
        default: default.map(|value| Value::String(value.to_string())),
    }
}

/// The provider settings in registration order. The order is stable.
pub fn setting_descriptors() -> Vec<SettingDescriptor> {
    vec![
        input(
            "authDisplayName",
            "OAuth2 provider display name",
            Some("OAuth2"),
        ),
        input("clientId", "Client ID (required)", None),
        input("clientSecret", "Client secret (required)", None),
        input(
            "domain",
            "Domain (required) example: auth.example.com",
            None,
        ),
        input("scope", "Scope (required)", Some("email openid profile")),
        input(
            "authorizePath",
            "Authorize URL path (required) example: /oauth2/authorize",
            Some(""),
        ),
        input(
            "tokenPath",
            "Token URL path (required) example: /oauth2/token",
            Some(""),
        ),
        input(
            "identityPath",
            "Identity URL path (required) example: /oauth2/userInfo",
            Some(""),
        ),
        input(
            "identityUsernameField",
            "Identity username field (required)",
            Some("username"),
        ),
        input(
            "identityEmailField",
            "Identity email field (required)",
            Some("email"),
        ),
        SettingDescriptor {
            name: "sendIdentityTokenViaHeader".to_string(),
            label: "Send identity token sent via HTTP header? (required for AWS Cognito)"
                .to_string(),
            setting_type: SettingType::InputCheckbox,
            private: true,
            default: None,
        },
        input(
            "accessTokenParam",
            "Identity access token URL parameter name (required if the identity access token is sent via the URL)",
            Some(""),
        ),
    ]
}
