//! External function-call descriptors attached to nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

/// An external function the model may ask a node to call.
pub trait Tool {
    fn name(&self) -> &str;

    /// Human-readable purpose, included in the node result.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object, shown to the model.
    fn argument_schema(&self) -> Option<Value> {
        None
    }

    fn invoke(&self, arguments: &Value) -> Result<Value>;
}

/// Shared handle to a registered tool.
#[derive(Clone)]
pub struct ToolRef(Arc<dyn Tool + Send + Sync>);

impl ToolRef {
    pub fn new<T: Tool + Send + Sync + 'static>(tool: T) -> Self {
        Self(Arc::new(tool))
    }

    /// Text shown to the model describing how to call the tool.
    pub fn prompt_description(&self) -> String {
        match self.0.argument_schema() {
            Some(schema) => schema.to_string(),
            None => format!("[Tool: {}]", self.0.name()),
        }
    }
}

impl std::ops::Deref for ToolRef {
    type Target = dyn Tool + Send + Sync;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for ToolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ToolRef").field(&self.0.name()).finish()
    }
}

/// Tools available to a planning session, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolRef) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolRef> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One prompt description per tool, in name order.
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|tool| format!("{}: {}\n{}", tool.name(), tool.description(), tool.prompt_description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
