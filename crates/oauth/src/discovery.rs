//! Authorization server discovery (RFC 8414) and dynamic client
//! registration (RFC 7591).

use {
    reqwest::Client,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
    url::Url,
};

use crate::{Error, Result};

/// Metadata returned by `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Fetch authorization server metadata for `issuer`.
///
/// The well-known document lives at the origin of the issuer, so any path on
/// the configured URL (for example an MCP endpoint path) is dropped.
pub async fn fetch_as_metadata(client: &Client, issuer: &Url) -> Result<AuthorizationServerMetadata> {
    let well_known = well_known_url(issuer)?;

    debug!(url = %well_known, "fetching authorization server metadata");

    let resp = client
        .get(well_known.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|source| {
            Error::external("failed to fetch authorization server metadata", source)
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::HttpStatus {
            endpoint: "authorization server metadata",
            status: status.as_u16(),
            body,
        });
    }

    let meta: AuthorizationServerMetadata = resp.json().await.map_err(|source| {
        Error::external("failed to parse authorization server metadata", source)
    })?;

    info!(issuer = %meta.issuer, "fetched authorization server metadata");

    Ok(meta)
}

/// Request body for dynamic client registration.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Successful registration response.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Register a public PKCE client at `registration_endpoint`.
pub async fn register_client(
    client: &Client,
    registration_endpoint: &str,
    redirect_uri: &str,
    client_name: &str,
    scope: Option<&str>,
) -> Result<ClientRegistrationResponse> {
    debug!(endpoint = %registration_endpoint, client_name, "registering OAuth client");

    let req = ClientRegistrationRequest {
        redirect_uris: vec![redirect_uri.to_string()],
        client_name: client_name.to_string(),
        grant_types: vec!["authorization_code".into(), "refresh_token".into()],
        response_types: vec!["code".into()],
        token_endpoint_auth_method: "none".into(),
        scope: scope.map(String::from),
    };

    let resp = client
        .post(registration_endpoint)
        .json(&req)
        .send()
        .await
        .map_err(|source| Error::external("failed to register OAuth client", source))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::HttpStatus {
            endpoint: "client registration",
            status: status.as_u16(),
            body,
        });
    }

    let reg: ClientRegistrationResponse = resp.json().await.map_err(|source| {
        Error::external("failed to parse client registration response", source)
    })?;

    info!(client_id = %reg.client_id, "registered OAuth client");

    Ok(reg)
}

fn well_known_url(issuer: &Url) -> Result<Url> {
    let mut origin = issuer.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
        .join(".well-known/oauth-authorization-server")
        .map_err(|source| {
            Error::external(format!("failed to build metadata URL from {issuer}"), source)
        })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    #[test]
    fn well_known_url_drops_path_and_query() {
        let issuer = Url::parse("https://mcp.example.com/orders?x=1#frag").unwrap();
        assert_eq!(
            well_known_url(&issuer).unwrap().as_str(),
            "https://mcp.example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn well_known_url_keeps_port() {
        let issuer = Url::parse("http://127.0.0.1:4100").unwrap();
        assert_eq!(
            well_known_url(&issuer).unwrap().as_str(),
            "http://127.0.0.1:4100/.well-known/oauth-authorization-server"
        );
    }

    #[tokio::test]
    async fn fetch_as_metadata_success() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let mock = server
            .mock("GET", "/.well-known/oauth-authorization-server")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "issuer": base.clone(),
                    "authorization_endpoint": format!("{base}/authorize"),
                    "token_endpoint": format!("{base}/token"),
                    "registration_endpoint": format!("{base}/register"),
                    "code_challenge_methods_supported": ["S256"],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let issuer = Url::parse(&format!("{base}/orders")).unwrap();
        let meta = fetch_as_metadata(&Client::new(), &issuer).await.unwrap();

        assert!(meta.token_endpoint.ends_with("/token"));
        assert_eq!(
            meta.registration_endpoint.as_deref(),
            Some(format!("{base}/register").as_str())
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_as_metadata_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/oauth-authorization-server")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let issuer = Url::parse(&server.url()).unwrap();
        let err = fetch_as_metadata(&Client::new(), &issuer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn register_client_sends_public_client_metadata() {
        let mut server = mockito::Server::new_async().await;
        let redirect_uri = "http://localhost:8765/callback";
        let mock = server
            .mock("POST", "/register")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "redirect_uris": [redirect_uri],
                "token_endpoint_auth_method": "none",
                "grant_types": ["authorization_code", "refresh_token"],
                "scope": "mcp:tools",
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "client_id": "dyn-client",
                    "redirect_uris": [redirect_uri],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let reg = register_client(
            &Client::new(),
            &format!("{}/register", server.url()),
            redirect_uri,
            "toolmesh",
            Some("mcp:tools"),
        )
        .await
        .unwrap();

        assert_eq!(reg.client_id, "dyn-client");
        assert!(reg.client_secret.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn register_client_error_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/register")
            .with_status(400)
            .with_body(r#"{"error":"invalid_client_metadata"}"#)
            .create_async()
            .await;

        let err = register_client(
            &Client::new(),
            &format!("{}/register", server.url()),
            "http://localhost:8765/callback",
            "toolmesh",
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("400"));
    }
}
