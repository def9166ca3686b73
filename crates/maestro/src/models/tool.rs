use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};
use crate::schema;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync>;

/// A tool that can be used by a model.
///
/// Unlike the plain schema advertised to the backend, a `Tool` also owns
/// the async handler that executes the call. Arguments are validated
/// against `parameters` before the handler runs.
#[derive(Clone)]
pub struct Tool {
    /// The name of the tool, unique within an agent's tool set
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON Schema for the arguments the tool accepts
    pub parameters: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Create a new tool with the given name, description, parameter
    /// schema and async handler.
    pub fn new<N, D, F, Fut>(name: N, description: D, parameters: Value, handler: F) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// The serializable view of this tool, as advertised to a backend.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Validate `arguments` against the parameter schema, then execute.
    pub async fn invoke(&self, arguments: Value) -> ToolResult<Value> {
        schema::validate(&self.parameters, &arguments).map_err(ToolError::InvalidParameters)?;
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// The schema-only view of a tool sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
