use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::StatusCode,
        response::{Html, IntoResponse, Response},
        routing::get,
    },
    tokio::{sync::oneshot, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{counter, oauth as oauth_metrics};

use crate::{Error, Result};

/// The outstanding half of an authorization request: what the callback
/// must echo back and the verifier the code exchange needs.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    pub created_at: u64,
}

struct CallbackState {
    expected_state: String,
    tx: std::sync::Mutex<Option<oneshot::Sender<Result<String>>>>,
}

impl CallbackState {
    fn complete(&self, outcome: Result<String>) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Local HTTP listener that receives the authorization redirect.
///
/// The listener is bound before the authorization URL is shown so that a fast
/// browser redirect cannot race it. It serves exactly one path; requests whose
/// `state` does not match are answered with an error page and ignored.
///
/// Dropping the server stops the listener, so an abandoned login never keeps
/// the port bound.
pub struct CallbackServer {
    local_addr: SocketAddr,
    rx: oneshot::Receiver<Result<String>>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:{port}` and start serving `path`.
    pub async fn bind(port: u16, path: &str, expected_state: String) -> Result<Self> {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state,
            tx: std::sync::Mutex::new(Some(tx)),
        });

        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| {
                Error::external(format!("failed to bind callback listener on port {port}"), source)
            })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(e) = server.await {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        info!(addr = %local_addr, "OAuth callback listener started");

        Ok(Self {
            local_addr,
            rx,
            shutdown,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for a valid callback, the timeout, or `cancel`.
    ///
    /// The listener is shut down and its port released before this returns,
    /// whatever the outcome.
    pub async fn wait_for_code(
        mut self,
        timeout: Duration,
        cancel: &CancellationToken,
        auth_url: &str,
    ) -> Result<String> {
        let outcome = tokio::select! {
            result = &mut self.rx => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::message("callback listener exited unexpectedly")),
            },
            () = tokio::time::sleep(timeout) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::FLOW_TIMEOUTS_TOTAL).increment(1);
                Err(Error::AuthTimeout {
                    seconds: timeout.as_secs(),
                    auth_url: auth_url.to_string(),
                })
            },
            () = cancel.cancelled() => Err(Error::LoginCancelled),
        };

        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "callback listener task failed");
            }
        }
        debug!(addr = %self.local_addr, "OAuth callback listener stopped");

        outcome
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(addr = %self.local_addr, "OAuth callback listener dropped");
        }
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    #[cfg(feature = "metrics")]
    counter!(oauth_metrics::CALLBACK_REQUESTS_TOTAL).increment(1);

    if params.get("state") != Some(&state.expected_state) {
        warn!("OAuth callback with unknown state ignored");
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "This login link is stale or does not belong to this session.",
        );
    }

    if let Some(error) = params.get("error") {
        let reason = match params.get("error_description") {
            Some(desc) => format!("{error}: {desc}"),
            None => error.clone(),
        };
        warn!(reason = %reason, "authorization server returned an error");
        state.complete(Err(Error::AuthorizationDenied {
            reason: reason.clone(),
        }));
        return page(StatusCode::BAD_REQUEST, "Authentication failed", &reason);
    }

    let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "The callback did not include an authorization code.",
        );
    };

    state.complete(Ok(code.clone()));
    page(
        StatusCode::OK,
        "Authentication successful!",
        "You can close this window and return to the terminal.",
    )
}

fn page(status: StatusCode, title: &str, body: &str) -> Response {
    let html = format!(
        "<!doctype html><html><body><h1>{}</h1><p>{}</p></body></html>",
        escape(title),
        escape(body)
    );
    (status, Html(html)).into_response()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_ephemeral(state: &str) -> CallbackServer {
        CallbackServer::bind(0, "/callback", state.to_string())
            .await
            .unwrap()
    }

    fn url(server: &CallbackServer, query: &str) -> String {
        format!("http://{}/callback?{query}", server.local_addr())
    }

    #[tokio::test]
    async fn valid_callback_yields_code() {
        let server = bind_ephemeral("s1").await;
        let target = url(&server, "code=abc&state=s1");

        let request = tokio::spawn(async move { reqwest::get(target).await.unwrap().status() });
        let code = server
            .wait_for_code(Duration::from_secs(5), &CancellationToken::new(), "u")
            .await
            .unwrap();

        assert_eq!(code, "abc");
        assert_eq!(request.await.unwrap(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_state_is_ignored_until_timeout() {
        let server = bind_ephemeral("expected").await;
        let target = url(&server, "code=abc&state=other");

        let request = tokio::spawn(async move { reqwest::get(target).await.unwrap().status() });
        let err = server
            .wait_for_code(
                Duration::from_millis(300),
                &CancellationToken::new(),
                "https://auth.example.com/authorize?x=1",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthTimeout { .. }));
        assert!(err.to_string().contains("https://auth.example.com/authorize?x=1"));
        assert_eq!(request.await.unwrap(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn error_param_is_denied() {
        let server = bind_ephemeral("s1").await;
        let target = url(&server, "error=access_denied&error_description=nope&state=s1");

        let request = tokio::spawn(async move { reqwest::get(target).await.unwrap().status() });
        let err = server
            .wait_for_code(Duration::from_secs(5), &CancellationToken::new(), "u")
            .await
            .unwrap_err();

        match err {
            Error::AuthorizationDenied { reason } => assert_eq!(reason, "access_denied: nope"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(request.await.unwrap(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let server = bind_ephemeral("s1").await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = server
            .wait_for_code(Duration::from_secs(30), &cancel, "u")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoginCancelled));
    }

    #[tokio::test]
    async fn port_is_released_after_wait() {
        let server = bind_ephemeral("s1").await;
        let port = server.local_addr().port();
        let _ = server
            .wait_for_code(Duration::from_millis(10), &CancellationToken::new(), "u")
            .await;

        let rebound = CallbackServer::bind(port, "/callback", "s2".into()).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn port_is_released_when_server_is_dropped() {
        let server = bind_ephemeral("s1").await;
        let port = server.local_addr().port();
        drop(server);

        // Abort takes effect once the runtime drops the task.
        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(server) = CallbackServer::bind(port, "/callback", "s2".into()).await {
                rebound = Some(server);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rebound.is_some(), "port {port} still bound after drop");
    }

    #[test]
    fn page_escapes_html() {
        assert_eq!(escape("<b>&\"</b>"), "&lt;b&gt;&amp;&quot;&lt;/b&gt;");
    }
}
