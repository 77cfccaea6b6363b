//! Tool registry: descriptors for `tools/list`, handlers for `tools/call`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::model::{DescriptorListResult, LogQueryResult, TimeSeriesResult, TopErrorsResult};

#[derive(Debug, Clone, Serialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Property {
    fn of(kind: &'static str, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::of("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::of("integer", description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::of("object", description)
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_property(mut self, name: &str, property: Property) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }
}

/// Top-level `inputSchema`; always an object.
#[derive(Debug, Clone, Serialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: BTreeMap<String, Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self {
            kind: "object",
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn property(mut self, name: &str, property: Property) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }

    pub fn required(mut self, names: &[&str]) -> Self {
        self.required = names.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

/// Result of a successful tool call. Serialised without a tag, so the wire
/// carries only the tool's own JSON shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    LogQuery(LogQueryResult),
    TopErrors(TopErrorsResult),
    TimeSeries(TimeSeriesResult),
    MetricDescriptors(DescriptorListResult),
}

/// A tool with typed arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    type Args: DeserializeOwned + Send;

    async fn call(&self, args: Self::Args) -> Result<ToolOutput>;
}

#[derive(Debug)]
pub enum Invocation {
    /// Arguments did not decode into the tool's parameter type.
    InvalidArguments(String),
    Completed(Result<ToolOutput>),
}

/// Object-safe form of [`Tool`] stored in the registry.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Invocation;
}

#[async_trait]
impl<T: Tool> ToolHandler for T {
    async fn invoke(&self, arguments: Value) -> Invocation {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        match serde_json::from_value::<T::Args>(arguments) {
            Ok(args) => Invocation::Completed(self.call(args).await),
            Err(e) => Invocation::InvalidArguments(e.to_string()),
        }
    }
}

/// Built once at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate names replace the earlier handler; descriptors are not deduplicated.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: impl ToolHandler + 'static) {
        self.handlers
            .insert(descriptor.name.clone(), Arc::new(handler));
        self.descriptors.push(descriptor);
    }

    pub fn list(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// `None` when no tool is registered under `name`.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Option<Invocation> {
        let handler = self.handlers.get(name)?;
        Some(handler.invoke(arguments).await)
    }
}
