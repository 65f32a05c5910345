//! Aggregates the tools of several authenticated MCP endpoints behind one
//! catalog.
//!
//! - Streamable HTTP transport with bearer auth and one retry on 401 (`transport`)
//! - Protocol handshake and tool calls per endpoint (`client`)
//! - Primary plus best-effort secondary sessions (`pool`)
//! - Deduplicated, schema-sanitized tool catalog (`catalog`)
//! - Timeout-bounded call routing with uniform results (`router`)
//! - `toolmesh.toml` loading (`config`)

pub mod aggregator;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod router;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    aggregator::Aggregator,
    auth::{CredentialSource, SharedCredentialSource, StaticToken},
    catalog::{
        CapabilityDescriptor, Catalog, CatalogSnapshot, ShadowedCapability, merge_listings,
        sanitize_schema,
    },
    client::{HttpConnector, McpClient, McpClientState},
    config::{AggregatorConfig, CONFIG_FILENAME, EndpointDescriptor, discover_and_load, load_config},
    error::{Error, Result},
    pool::{ConnectReport, DisconnectReport, SecondaryConnectWarning, SessionPool},
    router::{CallOutcome, CallRouter, flatten_result},
    traits::{McpTransport, SessionConnector, SharedSession, ToolSession},
    transport::HttpTransport,
};
