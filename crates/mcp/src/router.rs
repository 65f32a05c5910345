//! Routes a named invocation to the session that owns it.

use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use {
    std::time::Instant,
    toolmesh_metrics::{counter, histogram, mcp as mcp_metrics},
};

use crate::{
    catalog::Catalog,
    error::{Error, Result},
    pool::SessionPool,
    types::{ToolContent, ToolsCallResult},
};

/// Uniform result handed back to the caller.
///
/// Serializes as `{"ok": payload}` or `{"error": kind, "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallOutcome {
    Ok { ok: Value },
    Error { error: String, message: String },
}

impl CallOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(ok) => Self::Ok { ok },
            Err(e) => Self::Error {
                error: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

pub struct CallRouter {
    pool: Arc<SessionPool>,
    catalog: Arc<Catalog>,
    call_timeout: Duration,
}

impl CallRouter {
    pub fn new(pool: Arc<SessionPool>, catalog: Arc<Catalog>, call_timeout: Duration) -> Self {
        Self {
            pool,
            catalog,
            call_timeout,
        }
    }

    /// Invoke `name`, folding every failure into [`CallOutcome::Error`].
    pub async fn invoke(&self, name: &str, args: Value) -> CallOutcome {
        CallOutcome::from_result(self.try_invoke(name, args).await)
    }

    /// Invoke `name` with typed errors.
    ///
    /// Unknown names fail before any session is contacted. A timed out call
    /// leaves its session open.
    pub async fn try_invoke(&self, name: &str, args: Value) -> Result<Value> {
        let snapshot = self.catalog.get_capabilities().await?;
        let capability = snapshot
            .get(name)
            .ok_or_else(|| Error::UnknownCapability {
                name: name.to_string(),
            })?;

        let session = self
            .pool
            .session(&capability.session_key)
            .await?
            .ok_or_else(|| Error::Execution {
                name: name.to_string(),
                message: format!("endpoint '{}' is no longer connected", capability.session_key),
            })?;

        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        debug!(tool = %name, endpoint = %capability.session_key, "invoking tool");

        #[cfg(feature = "metrics")]
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        counter!(mcp_metrics::TOOL_CALLS_TOTAL, "tool" => name.to_string()).increment(1);

        let result = match tokio::time::timeout(self.call_timeout, session.call_tool(name, args))
            .await
        {
            Err(_) => Err(Error::InvocationTimeout {
                name: name.to_string(),
                timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Ok(Err(e)) => Err(Error::Execution {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(result)) => flatten_result(name, result),
        };

        #[cfg(feature = "metrics")]
        {
            histogram!(mcp_metrics::TOOL_CALL_DURATION_SECONDS, "tool" => name.to_string())
                .record(started.elapsed().as_secs_f64());
            if result.is_err() {
                counter!(mcp_metrics::TOOL_CALL_ERRORS_TOTAL, "tool" => name.to_string())
                    .increment(1);
            }
        }

        if let Err(e) = &result {
            warn!(tool = %name, error = %e, "tool invocation failed");
        }
        result
    }
}

/// Reduce a `tools/call` result to a single JSON value.
///
/// A lone text item is parsed as JSON when possible and returned as a string
/// otherwise; several text items become `{"content": [..texts]}`; anything
/// with non-text content becomes `{"content": [..items]}`.
pub fn flatten_result(name: &str, result: ToolsCallResult) -> Result<Value> {
    let texts: Vec<&str> = result.content.iter().filter_map(ToolContent::as_text).collect();

    if result.is_error {
        let message = if texts.is_empty() {
            "tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return Err(Error::Execution {
            name: name.to_string(),
            message,
        });
    }

    if texts.len() != result.content.len() {
        return Ok(serde_json::json!({ "content": serde_json::to_value(&result.content)? }));
    }

    match texts.as_slice() {
        [] => Ok(Value::Null),
        [single] => Ok(serde_json::from_str(single)
            .unwrap_or_else(|_| Value::String((*single).to_string()))),
        _ => Ok(serde_json::json!({ "content": texts })),
    }
}
