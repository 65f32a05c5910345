use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Endpoints and client parameters for one authorization-code flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The token set issued by the authorization server.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Unix timestamp when the access token expires.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl OAuthTokens {
    /// Whether the access token expires within `margin_secs` of `now`.
    ///
    /// Tokens without expiry information are treated as valid.
    #[must_use]
    pub fn expires_within(&self, now: u64, margin_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now.saturating_add(margin_secs) >= expires_at,
            None => false,
        }
    }
}

impl PartialEq for OAuthTokens {
    fn eq(&self, other: &Self) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.as_ref().map(ExposeSecret::expose_secret)
                == other.refresh_token.as_ref().map(ExposeSecret::expose_secret)
            && self.token_type == other.token_type
            && self.scope == other.scope
            && self.expires_at == other.expires_at
    }
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A client registration issued by the authorization server.
///
/// The resolved authorization and token endpoints are kept alongside the
/// client id so that refreshes never need a second discovery round-trip.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registered_at: u64,
}

impl ClientRegistration {
    /// Flow configuration for this registration and the given redirect URI.
    #[must_use]
    pub fn flow_config(&self, redirect_uri: &str) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            auth_url: self.authorization_endpoint.clone(),
            token_url: self.token_endpoint.clone(),
            redirect_uri: redirect_uri.to_string(),
            scopes: self
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}

impl PartialEq for ClientRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id
            && self.client_secret.as_ref().map(ExposeSecret::expose_secret)
                == other.client_secret.as_ref().map(ExposeSecret::expose_secret)
            && self.redirect_uris == other.redirect_uris
            && self.grant_types == other.grant_types
            && self.scope == other.scope
            && self.authorization_endpoint == other.authorization_endpoint
            && self.token_endpoint == other.token_endpoint
            && self.registered_at == other.registered_at
    }
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_types", &self.grant_types)
            .field("scope", &self.scope)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through the credential file.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: Option<u64>) -> OAuthTokens {
        OAuthTokens {
            access_token: Secret::new("at".into()),
            refresh_token: Some(Secret::new("rt".into())),
            token_type: "Bearer".into(),
            scope: None,
            expires_at,
        }
    }

    #[test]
    fn expiry_margin() {
        let now = 1_000_000;
        assert!(tokens(Some(now - 1)).expires_within(now, 60));
        assert!(tokens(Some(now + 30)).expires_within(now, 60));
        assert!(!tokens(Some(now + 3600)).expires_within(now, 60));
        assert!(!tokens(None).expires_within(now, 60));
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", tokens(None));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"at\""));
        assert!(!debug.contains("\"rt\""));
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let parsed: OAuthTokens = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(parsed.token_type, "Bearer");
        assert!(parsed.refresh_token.is_none());
    }

    #[test]
    fn registration_scope_splits_into_flow_scopes() {
        let reg = ClientRegistration {
            client_id: "cid".into(),
            client_secret: None,
            redirect_uris: vec!["http://localhost:8765/callback".into()],
            grant_types: vec!["authorization_code".into()],
            scope: Some("mcp:tools mcp:prompts".into()),
            authorization_endpoint: "https://auth.example.com/authorize".into(),
            token_endpoint: "https://auth.example.com/token".into(),
            registered_at: 0,
        };
        let config = reg.flow_config("http://localhost:8765/callback");
        assert_eq!(config.scopes, vec!["mcp:tools", "mcp:prompts"]);
        assert_eq!(config.token_url, "https://auth.example.com/token");
    }
}
