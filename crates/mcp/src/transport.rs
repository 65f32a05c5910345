//! Streamable HTTP transport for remote MCP endpoints.
//!
//! Every JSON-RPC message is an HTTP POST; responses arrive either as plain
//! JSON or as a short `text/event-stream`. Requests carry a Bearer token from
//! the shared credential source and are retried once after a 401.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    reqwest::{Client, StatusCode},
    secrecy::{ExposeSecret, Secret},
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    auth::SharedCredentialSource,
    error::{Context, Error, Result},
    traits::McpTransport,
    types::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransportError, PROTOCOL_VERSION,
    },
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

/// HTTP transport bound to one endpoint URL.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    url: String,
    next_id: AtomicU64,
    credentials: Option<SharedCredentialSource>,
    /// Token attached to the most recent request; reused for the closing DELETE.
    last_token: RwLock<Option<Secret<String>>>,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(
        endpoint: &str,
        url: &str,
        client: Client,
        credentials: Option<SharedCredentialSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            endpoint: endpoint.to_string(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            credentials,
            last_token: RwLock::new(None),
            session_id: RwLock::new(None),
        })
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Build a POST with session and Bearer headers; returns the token used.
    async fn build_post(&self) -> Result<(reqwest::RequestBuilder, Option<String>)> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let mut used = None;
        if let Some(credentials) = &self.credentials {
            let token = credentials.access_token().await?;
            req = req.bearer_auth(token.expose_secret());
            used = Some(token.expose_secret().clone());
            *self.last_token.write().await = Some(token);
        }

        Ok((req, used))
    }

    async fn store_session_id_from_response(&self, response: &reqwest::Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(
                endpoint = %self.endpoint,
                session_id = %session_id,
                "updated MCP session id"
            );
            *slot = Some(session_id.to_string());
        }
    }

    fn www_authenticate(resp: &reqwest::Response) -> Option<String> {
        resp.headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    fn response_is_event_stream(resp: &reqwest::Response) -> bool {
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|base| base.trim() == "text/event-stream")
    }

    /// POST `body`; on 401 let the credential source react and retry once.
    async fn send_with_auth_retry(
        &self,
        method: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response> {
        let (req, token) = self.build_post().await?;
        let http_resp = req
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;

        if http_resp.status() != StatusCode::UNAUTHORIZED {
            self.store_session_id_from_response(&http_resp).await;
            return Ok(http_resp);
        }

        self.store_session_id_from_response(&http_resp).await;
        let www_authenticate = Self::www_authenticate(&http_resp);

        if let (Some(credentials), Some(rejected)) = (&self.credentials, token.as_deref()) {
            info!(
                endpoint = %self.endpoint,
                method = %method,
                "received 401, renewing credentials"
            );

            if credentials
                .handle_unauthorized(rejected, www_authenticate.as_deref())
                .await?
            {
                let (req, _) = self.build_post().await?;
                let retry_resp = req.json(body).send().await.with_context(|| {
                    format!("POST retry to '{}' for '{method}' failed", self.url)
                })?;

                if retry_resp.status() == StatusCode::UNAUTHORIZED {
                    return Err(McpTransportError::Unauthorized {
                        www_authenticate: Self::www_authenticate(&retry_resp),
                    }
                    .into());
                }

                self.store_session_id_from_response(&retry_resp).await;
                return Ok(retry_resp);
            }
        }

        Err(McpTransportError::Unauthorized { www_authenticate }.into())
    }
}

/// Extract the JSON-RPC response from an event-stream body.
///
/// Events that are not responses (server notifications or requests) are
/// skipped.
fn parse_event_stream_response(body: &str, method: &str) -> Result<JsonRpcResponse> {
    fn as_response(data: &str) -> Option<JsonRpcResponse> {
        serde_json::from_str::<JsonRpcResponse>(data)
            .ok()
            .filter(|r| r.result.is_some() || r.error.is_some())
    }

    let mut data = String::new();
    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }

        if trimmed.is_empty() && !data.is_empty() {
            if let Some(resp) = as_response(&data) {
                return Ok(resp);
            }
            data.clear();
        }
    }

    if let Some(resp) = (!data.is_empty()).then(|| as_response(&data)).flatten() {
        return Ok(resp);
    }

    Err(Error::message(format!(
        "no JSON-RPC response in event stream for '{method}'"
    )))
}

#[async_trait::async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(endpoint = %self.endpoint, method = %method, id = %id, "client -> server");

        let http_resp = self.send_with_auth_retry(method, &req).await?;

        let status = http_resp.status();
        if !status.is_success() {
            let body = http_resp.text().await.unwrap_or_default();
            return Err(McpTransportError::HttpStatus {
                method: method.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let resp: JsonRpcResponse = if Self::response_is_event_stream(&http_resp) {
            let body = http_resp
                .text()
                .await
                .with_context(|| format!("failed to read event stream response for '{method}'"))?;
            parse_event_stream_response(&body, method)?
        } else {
            http_resp
                .json()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?
        };

        if let Some(err) = resp.error {
            return Err(McpTransportError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }
            .into());
        }

        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        };

        debug!(endpoint = %self.endpoint, method = %method, "client -> server (notification)");

        let http_resp = self.send_with_auth_retry(method, &notif).await?;
        if !http_resp.status().is_success() {
            let status = http_resp.status();
            warn!(endpoint = %self.endpoint, method = %method, %status, "notification returned non-success");
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let mut req = self
            .client
            .delete(&self.url)
            .timeout(std::time::Duration::from_secs(5))
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id);

        // Never trigger a login just to say goodbye.
        if let Some(token) = self.last_token.read().await.as_ref() {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to close session at '{}'", self.url))?;
        // 405 means the server does not support explicit session termination.
        let status = resp.status();
        if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
            return Err(McpTransportError::HttpStatus {
                method: "DELETE".into(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use {async_trait::async_trait, secrecy::Secret};

    use super::*;

    use crate::auth::{CredentialSource, StaticToken};

    fn transport(url: &str, credentials: Option<SharedCredentialSource>) -> Arc<HttpTransport> {
        HttpTransport::new("test", url, Client::new(), credentials)
    }

    /// Hands out `token-1` until a 401 is reported, then `token-2`.
    struct RotatingToken {
        rotated: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for RotatingToken {
        async fn access_token(&self) -> Result<Secret<String>> {
            let n = self.rotated.load(Ordering::SeqCst) + 1;
            Ok(Secret::new(format!("token-{n}")))
        }

        async fn handle_unauthorized(&self, rejected: &str, _: Option<&str>) -> Result<bool> {
            assert_eq!(rejected, "token-1");
            self.rotated.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn request_unreachable_is_error() {
        let result = transport("http://127.0.0.1:1/mcp", None)
            .request("test", None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_without_session_is_noop() {
        transport("http://127.0.0.1:1/mcp", None).close().await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_without_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .with_header("www-authenticate", r#"Bearer realm="test""#)
            .create_async()
            .await;

        let err = transport(&server.url(), None)
            .request("test", None)
            .await
            .unwrap_err();
        match err {
            Error::Transport(McpTransportError::Unauthorized { www_authenticate }) => {
                assert_eq!(www_authenticate.as_deref(), Some(r#"Bearer realm="test""#));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bearer_header_injected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer test-token-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let creds: SharedCredentialSource = Arc::new(StaticToken::new("test-token-123"));
        let resp = transport(&server.url(), Some(creds))
            .request("test", None)
            .await
            .unwrap();
        assert!(resp.result.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_renews_and_retries_once() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer token-1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer token-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .expect(1)
            .create_async()
            .await;

        let creds = Arc::new(RotatingToken {
            rotated: AtomicUsize::new(0),
        });
        let shared: SharedCredentialSource = creds.clone();
        let resp = transport(&server.url(), Some(shared))
            .request("tools/list", None)
            .await
            .unwrap();

        assert!(resp.result.is_some());
        assert_eq!(creds.rotated.load(Ordering::SeqCst), 1);
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn session_id_is_replayed() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-123")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("mcp-session-id", "session-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = transport(&server.url(), None);
        transport.request("initialize", None).await.unwrap();
        assert_eq!(transport.session_id().await.as_deref(), Some("session-123"));
        transport.request("tools/list", None).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn event_stream_response_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream; charset=utf-8")
            .with_body(concat!(
                "event: message\n",
                "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\n",
                "event: message\n",
                "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n",
            ))
            .create_async()
            .await;

        let resp = transport(&server.url(), None)
            .request("initialize", None)
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn rpc_error_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such method"}}"#)
            .create_async()
            .await;

        let err = transport(&server.url(), None)
            .request("bogus", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::Rpc { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn http_error_status_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let err = transport(&server.url(), None)
            .request("initialize", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(McpTransportError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn close_sends_delete_with_session_id() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-to-close")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/")
            .match_header("mcp-session-id", "session-to-close")
            .match_header("authorization", "Bearer t")
            .with_status(204)
            .create_async()
            .await;

        let creds: SharedCredentialSource = Arc::new(StaticToken::new("t"));
        let transport = transport(&server.url(), Some(creds));
        transport.request("initialize", None).await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.session_id().await.is_none());

        init.assert_async().await;
        delete.assert_async().await;
    }

    #[test]
    fn event_stream_without_response_is_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n\n";
        assert!(parse_event_stream_response(body, "x").is_err());
    }
}
