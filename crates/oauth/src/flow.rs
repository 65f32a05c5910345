use {secrecy::Secret, serde::Deserialize, tracing::debug, url::Url};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{counter, oauth as oauth_metrics};

use crate::{
    Error, Result,
    pkce::{generate_pkce, generate_state},
    types::{OAuthConfig, OAuthTokens, PkceChallenge},
};

/// Authorization-code-with-PKCE and refresh-token grants against one
/// authorization server.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

/// Result of starting the flow: the URL to present plus the secrets the
/// callback must be matched against.
pub struct AuthorizationRequest {
    pub url: String,
    pub pkce: PkceChallenge,
    pub state: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL and generate PKCE + state.
    pub fn start(&self) -> Result<AuthorizationRequest> {
        let pkce = generate_pkce();
        let state = generate_state();

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|source| Error::external("invalid authorization endpoint", source))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        if !self.config.scopes.is_empty() {
            url.query_pairs_mut()
                .append_pair("scope", &self.config.scopes.join(" "));
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            pkce,
            state,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<OAuthTokens> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::CODE_EXCHANGE_TOTAL).increment(1);

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];

        let result = self.post_token_form(&form).await;

        #[cfg(feature = "metrics")]
        if result.is_err() {
            counter!(oauth_metrics::CODE_EXCHANGE_ERRORS_TOTAL).increment(1);
        }

        result
    }

    /// Refresh an access token using a refresh token.
    ///
    /// Any failure, including a transport error, is reported as
    /// [`Error::TokenRefreshFailed`] so callers can fall back to a full login.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::TOKEN_REFRESH_TOTAL).increment(1);

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        self.post_token_form(&form).await.map_err(|e| {
            #[cfg(feature = "metrics")]
            counter!(oauth_metrics::TOKEN_REFRESH_FAILURES_TOTAL).increment(1);
            Error::TokenRefreshFailed {
                reason: e.to_string(),
            }
        })
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<OAuthTokens> {
        debug!(token_url = %self.config.token_url, grant = ?form.first().map(|(_, v)| *v), "posting token request");

        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                endpoint: "token endpoint",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|source| Error::external("failed to parse token response", source))?;
        Ok(tokens_from_response(parsed, toolmesh_common::unix_now()))
    }
}

fn tokens_from_response(resp: TokenResponse, now: u64) -> OAuthTokens {
    OAuthTokens {
        access_token: Secret::new(resp.access_token),
        refresh_token: resp.refresh_token.map(Secret::new),
        token_type: resp.token_type.unwrap_or_else(|| "Bearer".into()),
        scope: resp.scope,
        expires_at: resp.expires_in.map(|secs| now + secs),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {mockito::Matcher, secrecy::ExposeSecret};

    use super::*;

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".into(),
            auth_url: "https://auth.example.com/authorize".into(),
            token_url,
            redirect_uri: "http://localhost:8765/callback".into(),
            scopes: vec!["mcp:tools".into(), "mcp:prompts".into()],
        }
    }

    #[test]
    fn expires_in_becomes_absolute() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3600}"#).unwrap();
        let tokens = tokens_from_response(resp, 1_000);
        assert_eq!(tokens.expires_at, Some(4_600));
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[tokio::test]
    async fn exchange_posts_code_and_verifier() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("code_verifier".into(), "the-verifier".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:8765/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":60,"token_type":"bearer","scope":"mcp:tools"}"#,
            )
            .create_async()
            .await;

        let flow = OAuthFlow::new(config(format!("{}/token", server.url())));
        let tokens = flow.exchange("the-code", "the-verifier").await.unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "at-1");
        assert_eq!(
            tokens.refresh_token.as_ref().map(|s| s.expose_secret().as_str()),
            Some("rt-1")
        );
        assert_eq!(tokens.token_type, "bearer");
        assert_eq!(tokens.scope.as_deref(), Some("mcp:tools"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exchange_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let flow = OAuthFlow::new(config(format!("{}/token", server.url())));
        let err = flow.exchange("bad", "verifier").await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 400, .. }));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn refresh_failure_maps_to_refresh_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(401)
            .with_body("revoked")
            .create_async()
            .await;

        let flow = OAuthFlow::new(config(format!("{}/token", server.url())));
        let err = flow.refresh("stale").await.unwrap_err();
        assert!(matches!(err, Error::TokenRefreshFailed { .. }));
    }
}
