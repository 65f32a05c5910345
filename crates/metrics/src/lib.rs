//! Metric names for toolmesh.
//!
//! The crates record through the `metrics` facade macros re-exported here.
//! Installing a recorder (Prometheus or otherwise) is left to the embedding
//! application.
//!
//! ```rust,ignore
//! use toolmesh_metrics::{counter, mcp};
//!
//! counter!(mcp::TOOL_CALLS_TOTAL, "endpoint" => "orders").increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
