//! Seams between the pool and the wire.
//!
//! The pool, catalog and router only see [`ToolSession`]; the real
//! implementation is `McpClient` over [`McpTransport`], and tests substitute
//! in-process fakes through [`SessionConnector`].

use std::sync::Arc;

use {async_trait::async_trait, serde_json::Value};

use crate::{
    auth::SharedCredentialSource,
    client::McpClientState,
    config::EndpointDescriptor,
    error::Result,
    types::{JsonRpcResponse, McpToolDef, ToolsCallResult},
};

/// JSON-RPC request/notification channel to one endpoint.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Terminate the remote session, if one was established.
    async fn close(&self) -> Result<()>;
}

/// An initialized session with one endpoint.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Configured name of the endpoint this session talks to.
    fn endpoint_name(&self) -> &str;

    fn state(&self) -> McpClientState;

    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    /// Close the session. Calling it twice is harmless.
    async fn close(&self) -> Result<()>;
}

pub type SharedSession = Arc<dyn ToolSession>;

/// Opens sessions for endpoint descriptors.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        endpoint: &EndpointDescriptor,
        credentials: SharedCredentialSource,
    ) -> Result<SharedSession>;
}
