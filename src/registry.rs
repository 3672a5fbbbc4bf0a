//! Global proxy-tool registry.
//!
//! Tools discovered on downstream servers are registered here once, with
//! process lifetime; per-session visibility is enforced separately at
//! dispatch time. A tool name maps to exactly one owning server - two
//! servers advertising the same name is a configuration error rejected at
//! registration time, before anything is inserted.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::protocol::Tool;
use crate::{Error, Result};

/// A proxy entry: one downstream tool exposed through the gateway
#[derive(Debug, Clone)]
pub struct DynamicTool {
    /// Globally unique tool name
    pub name: String,
    /// Catalog name of the owning server
    pub server: String,
    /// Description copied from downstream discovery
    pub description: Option<String>,
    /// Input JSON Schema copied verbatim from downstream discovery
    pub input_schema: Value,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_name: HashMap<String, DynamicTool>,
    /// Registration order, for a stable `tools/list`
    order: Vec<String>,
}

/// Process-global registry of [`DynamicTool`]s
#[derive(Debug, Default)]
pub struct ProxyToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ProxyToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool a server's discovery returned, atomically.
    ///
    /// Idempotent across sessions: names already owned by `server` are left
    /// untouched. A name owned by a *different* server fails the whole batch
    /// with `Conflict/ToolNameCollision` and no registry change.
    ///
    /// Returns the server's tool names in discovery order.
    pub fn register_batch(&self, server: &str, tools: &[Tool]) -> Result<Vec<String>> {
        let mut inner = self.inner.write();

        for tool in tools {
            if let Some(existing) = inner.by_name.get(&tool.name) {
                if existing.server != server {
                    return Err(Error::ToolNameCollision {
                        tool: tool.name.clone(),
                        existing: existing.server.clone(),
                        offender: server.to_string(),
                    });
                }
            }
        }

        let mut names = Vec::with_capacity(tools.len());
        for tool in tools {
            if !names.contains(&tool.name) {
                names.push(tool.name.clone());
            }
            if inner.by_name.contains_key(&tool.name) {
                continue;
            }
            inner.order.push(tool.name.clone());
            inner.by_name.insert(
                tool.name.clone(),
                DynamicTool {
                    name: tool.name.clone(),
                    server: server.to_string(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                },
            );
        }

        Ok(names)
    }

    /// Look up a proxy entry by tool name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DynamicTool> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// All registered tools in registration order
    #[must_use]
    pub fn all(&self) -> Vec<DynamicTool> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.by_name.get(name).cloned())
            .collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }
}
