//! One entry point over authentication, sessions, catalog and routing.

use std::{sync::Arc, time::Duration};

use {
    serde_json::Value,
    tracing::{info, warn},
};

use toolmesh_oauth::{AuthEngine, CredentialStore};

use crate::{
    auth::SharedCredentialSource,
    catalog::{Catalog, CatalogSnapshot},
    client::HttpConnector,
    config::{AggregatorConfig, EndpointDescriptor},
    error::{Error, Result},
    pool::{ConnectReport, DisconnectReport, SessionPool},
    router::{CallOutcome, CallRouter},
    traits::SessionConnector,
    types::McpToolDef,
};

pub struct Aggregator {
    engine: Option<Arc<AuthEngine>>,
    connector: Arc<dyn SessionConnector>,
    credentials: SharedCredentialSource,
    pool: Arc<SessionPool>,
    catalog: Arc<Catalog>,
    router: CallRouter,
}

impl Aggregator {
    /// Wire the real stack: browser login, file-backed credentials and
    /// streamable HTTP sessions.
    pub fn from_config(config: &AggregatorConfig) -> Result<Self> {
        config.validate()?;
        let store = CredentialStore::new(config.resolved_credentials_path());
        let engine = Arc::new(AuthEngine::new(config.effective_auth()?, store));
        let connector = Arc::new(HttpConnector::new(
            config.connect_timeout(),
            config.request_timeout(),
        )?);
        let mut aggregator = Self::with_parts(
            config.endpoints.clone(),
            connector,
            Arc::clone(&engine) as SharedCredentialSource,
            config.call_timeout(),
        );
        aggregator.engine = Some(engine);
        Ok(aggregator)
    }

    /// Assemble from explicit parts. No [`AuthEngine`] is attached.
    pub fn with_parts(
        endpoints: Vec<EndpointDescriptor>,
        connector: Arc<dyn SessionConnector>,
        credentials: SharedCredentialSource,
        call_timeout: Duration,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(
            endpoints,
            Arc::clone(&connector),
            Arc::clone(&credentials),
        ));
        let catalog = Arc::new(Catalog::new(Arc::clone(&pool)));
        let router = CallRouter::new(Arc::clone(&pool), Arc::clone(&catalog), call_timeout);
        Self {
            engine: None,
            connector,
            credentials,
            pool,
            catalog,
            router,
        }
    }

    pub fn engine(&self) -> Option<&Arc<AuthEngine>> {
        self.engine.as_ref()
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Authenticate, open the primary and every reachable secondary.
    pub async fn connect(&self) -> Result<ConnectReport> {
        let report = self.pool.connect().await?;
        info!(
            connected = report.connected.len(),
            unavailable = report.warnings.len(),
            "aggregator connected"
        );
        Ok(report)
    }

    pub async fn get_available_tools(&self) -> Result<Arc<CatalogSnapshot>> {
        self.catalog.get_capabilities().await
    }

    /// Force a fresh listing from every session.
    pub async fn refresh_tools(&self) -> Result<Arc<CatalogSnapshot>> {
        self.catalog.refresh().await
    }

    pub async fn invoke(&self, name: &str, args: Value) -> CallOutcome {
        self.router.invoke(name, args).await
    }

    pub async fn try_invoke(&self, name: &str, args: Value) -> Result<Value> {
        self.router.try_invoke(name, args).await
    }

    /// Abort any pending login, then close sessions newest first.
    pub async fn disconnect(&self) -> DisconnectReport {
        if let Some(engine) = &self.engine {
            engine.cancel_login();
        }
        let report = self.pool.disconnect().await;
        self.catalog.invalidate().await;
        report
    }

    /// Drop every session and connect again, retrying secondaries that were
    /// unavailable before.
    pub async fn reconnect(&self) -> Result<ConnectReport> {
        self.catalog.invalidate().await;
        self.pool.reconnect().await
    }

    pub async fn is_ready(&self) -> bool {
        self.pool.is_ready().await
    }

    pub async fn is_degraded(&self) -> bool {
        self.pool.is_degraded().await
    }

    /// Authenticate and list the primary endpoint's tools without keeping a
    /// session open.
    pub async fn login_only(&self) -> Result<Vec<McpToolDef>> {
        self.credentials.access_token().await?;

        let primary = self
            .pool
            .endpoints()
            .first()
            .ok_or_else(|| Error::config("no endpoints configured"))?;
        let session = self
            .connector
            .open(primary, Arc::clone(&self.credentials))
            .await
            .map_err(|e| Error::Connect {
                endpoint: primary.name.clone(),
                message: e.to_string(),
            })?;

        let tools = session.list_tools().await;
        if let Err(e) = session.close().await {
            warn!(endpoint = %primary.name, error = %e, "error closing session");
        }
        let tools = tools?;
        info!(endpoint = %primary.name, tools = tools.len(), "login verified");
        Ok(tools)
    }
}
