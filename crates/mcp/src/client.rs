//! MCP client: protocol handshake and tool calls against a single endpoint.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{counter, mcp as mcp_metrics};

use crate::{
    auth::SharedCredentialSource,
    config::EndpointDescriptor,
    error::{Context, Error, Result},
    traits::{McpTransport, SessionConnector, SharedSession, ToolSession},
    transport::HttpTransport,
    types::{
        InitializeParams, InitializeResult, McpToolDef, ToolsCallParams, ToolsCallResult,
        ToolsListResult,
    },
};

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport created, not yet initialized.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Session was closed.
    Closed,
}

/// An MCP client bound to one endpoint.
pub struct McpClient {
    endpoint: String,
    transport: Arc<dyn McpTransport>,
    state: std::sync::Mutex<McpClientState>,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Perform the MCP handshake (`initialize` + `notifications/initialized`)
    /// over an existing transport.
    pub async fn connect(endpoint: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            endpoint: endpoint.into(),
            transport,
            state: std::sync::Mutex::new(McpClientState::Connected),
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(endpoint = %endpoint, error = %e, "MCP initialize handshake failed");
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams::for_client("toolmesh", env!("CARGO_PKG_VERSION"));

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        let result: InitializeResult =
            serde_json::from_value(resp.result.context("MCP initialize returned no result")?)
                .context("failed to parse MCP initialize result")?;

        info!(
            endpoint = %self.endpoint,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP session initialized"
        );
        if !result.offers_tools() {
            warn!(endpoint = %self.endpoint, "server does not advertise the tools capability");
        }

        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.set_state(McpClientState::Ready);

        Ok(())
    }

    #[must_use]
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    fn set_state(&self, state: McpClientState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state();
        if state != McpClientState::Ready {
            return Err(Error::message(format!(
                "MCP session for '{}' is not ready (state: {state:?})",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolSession for McpClient {
    fn endpoint_name(&self) -> &str {
        &self.endpoint
    }

    fn state(&self) -> McpClientState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let resp = self.transport.request("tools/list", params).await?;
            let page: ToolsListResult =
                serde_json::from_value(resp.result.context("tools/list returned no result")?)?;
            tools.extend(page.tools);

            let Some(next) = page.next_cursor else {
                break;
            };
            if !seen.insert(next.clone()) {
                warn!(
                    endpoint = %self.endpoint,
                    cursor = %next,
                    "tools/list cursor repeated, stopping pagination"
                );
                break;
            }
            cursor = Some(next);
        }

        debug!(endpoint = %self.endpoint, count = tools.len(), "fetched MCP tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };

        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        let result: ToolsCallResult =
            serde_json::from_value(resp.result.context("tools/call returned no result")?)?;

        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        if self.state() == McpClientState::Closed {
            return Ok(());
        }
        self.set_state(McpClientState::Closed);
        self.transport.close().await
    }
}

/// Opens real sessions over streamable HTTP, sharing one connection pool.
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client for MCP transport")?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionConnector for HttpConnector {
    async fn open(
        &self,
        endpoint: &EndpointDescriptor,
        credentials: SharedCredentialSource,
    ) -> Result<SharedSession> {
        info!(endpoint = %endpoint.name, url = %endpoint.url, "connecting to MCP endpoint");

        let transport = HttpTransport::new(
            &endpoint.name,
            &endpoint.url,
            self.client.clone(),
            Some(credentials),
        );
        let result = McpClient::connect(&endpoint.name, transport).await;

        #[cfg(feature = "metrics")]
        counter!(
            mcp_metrics::SESSION_CONNECTS_TOTAL,
            "endpoint" => endpoint.name.clone(),
            "outcome" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);

        Ok(Arc::new(result?))
    }
}
