//! Metric name constants, grouped by subsystem.

/// Authorization flow metrics.
pub mod oauth {
    /// Interactive login flows started
    pub const FLOW_STARTS_TOTAL: &str = "toolmesh_oauth_flow_starts_total";
    /// Interactive login flows that produced a token set
    pub const FLOW_COMPLETIONS_TOTAL: &str = "toolmesh_oauth_flow_completions_total";
    /// Interactive login flows that timed out
    pub const FLOW_TIMEOUTS_TOTAL: &str = "toolmesh_oauth_flow_timeouts_total";
    /// Authorization code exchanges
    pub const CODE_EXCHANGE_TOTAL: &str = "toolmesh_oauth_code_exchange_total";
    /// Authorization code exchange errors
    pub const CODE_EXCHANGE_ERRORS_TOTAL: &str = "toolmesh_oauth_code_exchange_errors_total";
    /// Refresh token grants attempted
    pub const TOKEN_REFRESH_TOTAL: &str = "toolmesh_oauth_token_refresh_total";
    /// Refresh token grants rejected or failed
    pub const TOKEN_REFRESH_FAILURES_TOTAL: &str = "toolmesh_oauth_token_refresh_failures_total";
    /// Requests received by the loopback callback listener
    pub const CALLBACK_REQUESTS_TOTAL: &str = "toolmesh_oauth_callback_requests_total";
}

/// Session pool and call routing metrics.
pub mod mcp {
    /// Session open attempts, labelled by endpoint and outcome (`ok` or `error`)
    pub const SESSION_CONNECTS_TOTAL: &str = "toolmesh_mcp_session_connects_total";
    /// Sessions currently open
    pub const SESSIONS_CONNECTED: &str = "toolmesh_mcp_sessions_connected";
    /// Catalog rebuilds
    pub const CATALOG_REFRESH_TOTAL: &str = "toolmesh_mcp_catalog_refresh_total";
    /// Capability invocations
    pub const TOOL_CALLS_TOTAL: &str = "toolmesh_mcp_tool_calls_total";
    /// Capability invocation duration in seconds
    pub const TOOL_CALL_DURATION_SECONDS: &str = "toolmesh_mcp_tool_call_duration_seconds";
    /// Capability invocations that failed or timed out
    pub const TOOL_CALL_ERRORS_TOTAL: &str = "toolmesh_mcp_tool_call_errors_total";
}
