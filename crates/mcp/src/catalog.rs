//! Unified capability catalog across every open session.
//!
//! Listing is concurrent, merging is sequential in session order, and the
//! first session to list a name owns it.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    futures::future::join_all,
    serde::Serialize,
    serde_json::{Map, Value},
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{counter, mcp as mcp_metrics};

use crate::{error::Result, pool::SessionPool, types::McpToolDef};

/// One invokable capability in the unified catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    /// Name of the endpoint whose session serves this capability.
    pub session_key: String,
}

/// A capability dropped because an earlier session already listed its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowedCapability {
    pub name: String,
    pub endpoint: String,
    pub kept_from: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub capabilities: Vec<CapabilityDescriptor>,
    pub shadowed: Vec<ShadowedCapability>,
}

/// Normalize a parameter schema.
///
/// A `type` array of exactly one element collapses to that element; any other
/// length becomes `"string"`. Every `enum` value becomes its string form.
/// Nested objects and arrays are walked recursively.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::Array(types)) => collapse_type(types),
                        ("enum", Value::Array(values)) => {
                            Value::Array(values.iter().map(enum_value_as_string).collect())
                        },
                        _ => sanitize_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(cleaned)
        },
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn collapse_type(types: &[Value]) -> Value {
    match types {
        [Value::Array(inner)] => collapse_type(inner),
        [single] => sanitize_schema(single),
        _ => Value::String("string".into()),
    }
}

fn enum_value_as_string(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

/// Merge per-session listings in the given order. First seen name wins.
#[must_use]
pub fn merge_listings(listings: Vec<(String, Vec<McpToolDef>)>) -> MergeOutcome {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut outcome = MergeOutcome::default();

    for (endpoint, tools) in listings {
        for tool in tools {
            if let Some(kept_from) = owners.get(&tool.name) {
                outcome.shadowed.push(ShadowedCapability {
                    name: tool.name,
                    endpoint: endpoint.clone(),
                    kept_from: kept_from.clone(),
                });
                continue;
            }
            owners.insert(tool.name.clone(), endpoint.clone());

            let schema = if tool.input_schema.is_null() {
                serde_json::json!({ "type": "object", "properties": {} })
            } else {
                sanitize_schema(&tool.input_schema)
            };
            outcome.capabilities.push(CapabilityDescriptor {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                parameter_schema: schema,
                session_key: endpoint.clone(),
            });
        }
    }
    outcome
}

/// An immutable catalog build.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub built_at: u64,
    pub pool_generation: u64,
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Endpoints that failed to list during this build.
    pub listing_failures: Vec<String>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    fn new(
        version: u64,
        pool_generation: u64,
        capabilities: Vec<CapabilityDescriptor>,
        listing_failures: Vec<String>,
    ) -> Self {
        let index = capabilities
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            version,
            built_at: toolmesh_common::unix_now(),
            pool_generation,
            capabilities,
            listing_failures,
            index,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    #[must_use]
    pub fn names(&self) -> HashSet<&str> {
        self.index.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

pub struct Catalog {
    pool: Arc<SessionPool>,
    cache: RwLock<Option<Arc<CatalogSnapshot>>>,
    refresh_lock: Mutex<()>,
    next_version: AtomicU64,
}

impl Catalog {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    /// The cached snapshot if it still matches the pool, otherwise a fresh build.
    pub async fn get_capabilities(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.valid_cached().await {
            return Ok(snapshot);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(snapshot) = self.valid_cached().await {
            return Ok(snapshot);
        }
        self.build().await
    }

    /// Rebuild from every session, regardless of the cache.
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        self.build().await
    }

    pub async fn invalidate(&self) {
        self.cache.write().await.take();
    }

    async fn valid_cached(&self) -> Option<Arc<CatalogSnapshot>> {
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|s| s.pool_generation == self.pool.generation())
            .cloned()
    }

    async fn build(&self) -> Result<Arc<CatalogSnapshot>> {
        let generation = self.pool.generation();
        let sessions = self.pool.sessions().await?;

        let listed = join_all(sessions.iter().map(|s| s.list_tools())).await;

        let mut listings = Vec::with_capacity(sessions.len());
        let mut failures = Vec::new();
        for (session, result) in sessions.iter().zip(listed) {
            let endpoint = session.endpoint_name().to_string();
            match result {
                Ok(tools) => listings.push((endpoint, tools)),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "failed to list tools");
                    failures.push(endpoint);
                },
            }
        }

        let outcome = merge_listings(listings);
        for shadowed in &outcome.shadowed {
            debug!(
                tool = %shadowed.name,
                endpoint = %shadowed.endpoint,
                kept_from = %shadowed.kept_from,
                "skipping duplicate tool"
            );
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(CatalogSnapshot::new(
            version,
            generation,
            outcome.capabilities,
            failures,
        ));

        info!(
            tools = snapshot.len(),
            sessions = sessions.len(),
            shadowed = outcome.shadowed.len(),
            version,
            "tool catalog built"
        );

        #[cfg(feature = "metrics")]
        counter!(mcp_metrics::CATALOG_REFRESH_TOTAL).increment(1);

        // A partial listing is served but not cached, so the next call retries.
        if snapshot.listing_failures.is_empty() {
            *self.cache.write().await = Some(Arc::clone(&snapshot));
        } else {
            self.cache.write().await.take();
        }
        Ok(snapshot)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool(name: &str, schema: Value) -> McpToolDef {
        McpToolDef {
            name: name.into(),
            description: Some(format!("{name} tool")),
            input_schema: schema,
        }
    }

    #[test]
    fn type_list_collapses() {
        let s = sanitize_schema(&json!({"type": ["integer"]}));
        assert_eq!(s, json!({"type": "integer"}));

        let s = sanitize_schema(&json!({"type": ["string", "null"]}));
        assert_eq!(s, json!({"type": "string"}));

        let s = sanitize_schema(&json!({"type": []}));
        assert_eq!(s, json!({"type": "string"}));
    }

    #[test]
    fn enum_values_become_strings() {
        let s = sanitize_schema(&json!({"enum": [1, "two", true, null, 2.5]}));
        assert_eq!(s, json!({"enum": ["1", "two", "true", "null", "2.5"]}));
    }

    #[test]
    fn nested_properties_and_arrays_are_walked() {
        let s = sanitize_schema(&json!({
            "type": "object",
            "properties": {
                "qty": {"type": ["integer"]},
                "addr": {
                    "type": "object",
                    "properties": {"kind": {"enum": [1, 2]}}
                },
                "items": {"type": "array", "items": {"type": ["number", "null"]}},
                "either": {"anyOf": [{"type": ["boolean"]}, {"enum": [false]}]}
            },
            "required": ["qty"]
        }));
        assert_eq!(s["properties"]["qty"]["type"], "integer");
        assert_eq!(s["properties"]["addr"]["properties"]["kind"]["enum"], json!(["1", "2"]));
        assert_eq!(s["properties"]["items"]["items"]["type"], "string");
        assert_eq!(s["properties"]["either"]["anyOf"][0]["type"], "boolean");
        assert_eq!(s["properties"]["either"]["anyOf"][1]["enum"], json!(["false"]));
        assert_eq!(s["required"], json!(["qty"]));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let schemas = [
            json!({"type": ["integer", "null"], "enum": [1, {"a": 1}]}),
            json!({"properties": {"x": {"type": [["nested"]]}}}),
            json!({"anyOf": [{"type": ["a"]}, {"enum": [[1, 2]]}]}),
            json!("plain"),
            json!(null),
        ];
        for schema in schemas {
            let once = sanitize_schema(&schema);
            assert_eq!(sanitize_schema(&once), once, "not idempotent for {schema}");
        }
    }

    #[test]
    fn first_listed_name_wins() {
        let outcome = merge_listings(vec![
            (
                "food".into(),
                vec![tool("search", json!({"type": "object"})), tool("cart", json!({}))],
            ),
            (
                "grocery".into(),
                vec![tool("search", json!({"type": "object"})), tool("basket", json!({}))],
            ),
        ]);

        let names: Vec<_> = outcome.capabilities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["search", "cart", "basket"]);
        assert_eq!(outcome.capabilities[0].session_key, "food");
        assert_eq!(outcome.capabilities[2].session_key, "grocery");
        assert_eq!(outcome.shadowed, vec![ShadowedCapability {
            name: "search".into(),
            endpoint: "grocery".into(),
            kept_from: "food".into(),
        }]);
    }

    #[test]
    fn missing_schema_becomes_empty_object() {
        let outcome = merge_listings(vec![("a".into(), vec![McpToolDef {
            name: "ping".into(),
            description: None,
            input_schema: Value::Null,
        }])]);
        let cap = &outcome.capabilities[0];
        assert_eq!(cap.parameter_schema, json!({"type": "object", "properties": {}}));
        assert_eq!(cap.description, "");
    }

    #[test]
    fn snapshot_index_lookup() {
        let outcome = merge_listings(vec![("a".into(), vec![
            tool("x", json!({})),
            tool("y", json!({})),
        ])]);
        let snapshot = CatalogSnapshot::new(1, 1, outcome.capabilities, Vec::new());
        assert_eq!(snapshot.get("y").unwrap().session_key, "a");
        assert!(snapshot.get("z").is_none());
        assert_eq!(snapshot.names().len(), 2);
    }
}
