//! Session pool: one authenticated session per configured endpoint.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    futures::future::join_all,
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{gauge, mcp as mcp_metrics};

use crate::{
    auth::SharedCredentialSource,
    config::EndpointDescriptor,
    error::{Error, Result},
    traits::{SessionConnector, SharedSession},
};

/// A secondary endpoint that could not be opened. The pool runs without it.
#[derive(Debug, Clone, Serialize)]
pub struct SecondaryConnectWarning {
    pub endpoint: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectReport {
    /// Endpoints with an open session, in configuration order.
    pub connected: Vec<String>,
    pub warnings: Vec<SecondaryConnectWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseFailure {
    pub endpoint: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DisconnectReport {
    /// Endpoints in the order they were closed.
    pub closed: Vec<String>,
    pub failures: Vec<CloseFailure>,
}

#[derive(Default)]
struct PoolState {
    /// Primary first, then the secondaries that opened, in configuration order.
    sessions: Vec<SharedSession>,
    warnings: Vec<SecondaryConnectWarning>,
    ready: bool,
}

pub struct SessionPool {
    endpoints: Vec<EndpointDescriptor>,
    connector: Arc<dyn SessionConnector>,
    credentials: SharedCredentialSource,
    state: RwLock<PoolState>,
    generation: AtomicU64,
}

impl SessionPool {
    pub fn new(
        endpoints: Vec<EndpointDescriptor>,
        connector: Arc<dyn SessionConnector>,
        credentials: SharedCredentialSource,
    ) -> Self {
        Self {
            endpoints,
            connector,
            credentials,
            state: RwLock::new(PoolState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Open the primary session, then every secondary concurrently.
    ///
    /// Primary failure is fatal. Secondary failures are logged and recorded,
    /// and the pool continues in degraded mode. Connecting an already
    /// connected pool is a no-op.
    pub async fn connect(&self) -> Result<ConnectReport> {
        let mut state = self.state.write().await;
        if state.ready {
            return Ok(Self::report(&state));
        }

        let (primary, secondaries) = self
            .endpoints
            .split_first()
            .ok_or_else(|| Error::config("no endpoints configured"))?;

        // Authenticate once up front so secondaries never race into a login.
        self.credentials.access_token().await?;

        let primary_session = self
            .connector
            .open(primary, Arc::clone(&self.credentials))
            .await
            .map_err(|e| Error::Connect {
                endpoint: primary.name.clone(),
                message: e.to_string(),
            })?;
        info!(endpoint = %primary.name, "connected (primary)");

        let opened = join_all(
            secondaries
                .iter()
                .map(|ep| self.connector.open(ep, Arc::clone(&self.credentials))),
        )
        .await;

        let mut sessions = vec![primary_session];
        let mut warnings = Vec::new();
        for (endpoint, result) in secondaries.iter().zip(opened) {
            match result {
                Ok(session) => {
                    info!(endpoint = %endpoint.name, url = %endpoint.url, "connected");
                    sessions.push(session);
                },
                Err(e) => {
                    warn!(endpoint = %endpoint.name, error = %e, "secondary endpoint unavailable, continuing without it");
                    warnings.push(SecondaryConnectWarning {
                        endpoint: endpoint.name.clone(),
                        message: e.to_string(),
                    });
                },
            }
        }

        #[cfg(feature = "metrics")]
        gauge!(mcp_metrics::SESSIONS_CONNECTED).set(sessions.len() as f64);

        *state = PoolState {
            sessions,
            warnings,
            ready: true,
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(Self::report(&state))
    }

    fn report(state: &PoolState) -> ConnectReport {
        ConnectReport {
            connected: state
                .sessions
                .iter()
                .map(|s| s.endpoint_name().to_string())
                .collect(),
            warnings: state.warnings.clone(),
        }
    }

    /// Close every session in reverse-open order. Each close is best effort.
    pub async fn disconnect(&self) -> DisconnectReport {
        let sessions = {
            let mut state = self.state.write().await;
            let sessions = std::mem::take(&mut state.sessions);
            state.warnings.clear();
            state.ready = false;
            sessions
        };
        if !sessions.is_empty() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        let mut report = DisconnectReport::default();
        for session in sessions.iter().rev() {
            let endpoint = session.endpoint_name().to_string();
            match session.close().await {
                Ok(()) => info!(endpoint = %endpoint, "session closed"),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "error closing session");
                    report.failures.push(CloseFailure {
                        endpoint: endpoint.clone(),
                        message: e.to_string(),
                    });
                },
            }
            report.closed.push(endpoint);
        }

        #[cfg(feature = "metrics")]
        gauge!(mcp_metrics::SESSIONS_CONNECTED).set(0.0);

        report
    }

    /// Close everything and connect again from scratch.
    pub async fn reconnect(&self) -> Result<ConnectReport> {
        let report = self.disconnect().await;
        if !report.failures.is_empty() {
            warn!(failures = report.failures.len(), "some sessions did not close cleanly before reconnect");
        }
        self.connect().await
    }

    /// Open sessions in merge order. Fails with `NotConnected` before `connect()`.
    pub async fn sessions(&self) -> Result<Vec<SharedSession>> {
        let state = self.state.read().await;
        if !state.ready {
            return Err(Error::NotConnected);
        }
        Ok(state.sessions.clone())
    }

    pub async fn session(&self, endpoint: &str) -> Result<Option<SharedSession>> {
        Ok(self
            .sessions()
            .await?
            .into_iter()
            .find(|s| s.endpoint_name() == endpoint))
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.ready
    }

    /// Connected, but at least one secondary is missing.
    pub async fn is_degraded(&self) -> bool {
        let state = self.state.read().await;
        state.ready && !state.warnings.is_empty()
    }

    pub async fn warnings(&self) -> Vec<SecondaryConnectWarning> {
        self.state.read().await.warnings.clone()
    }

    /// Bumped whenever the set of open sessions changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }
}
