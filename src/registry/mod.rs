//! Name- and URI-keyed capability tables
//!
//! Registries are filled during the registration phase and only read afterwards; neither
//! validates nor executes anything itself.

pub mod resources;
pub mod tools;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::{
    protocol::{Identity, Request, RequestId},
    schema::FieldType,
};

pub use resources::{Placeholders, ResourceDefinition, ResourceRegistry, ResourceResolver, UriPattern};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a tool named `{0}` is already registered")]
    DuplicateName(String),
    #[error("invalid tool name `{0}`: use 1-64 ASCII letters, digits, `_` or `-`")]
    InvalidName(String),
    #[error("invalid resource pattern `{pattern}`: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
    #[error("resource pattern `{pattern}` is ambiguous with already registered `{existing}`")]
    AmbiguousPattern { pattern: String, existing: String },
}

/// What a handler learns about the call besides its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub request_id: RequestId,
    pub identity: Option<Identity>,
    pub catalog: Arc<Catalog>,
}

impl CallContext {
    pub fn new(request_id: impl Into<RequestId>) -> Self {
        Self {
            request_id: request_id.into(),
            identity: None,
            catalog: Arc::default(),
        }
    }

    pub fn for_request(request: &Request, catalog: &Arc<Catalog>) -> Self {
        Self {
            request_id: request.id.clone(),
            identity: request.identity.clone(),
            catalog: Arc::clone(catalog),
        }
    }
}

/// Read-only listing of everything registered, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    pub tools: Vec<ToolSummary>,
    pub resources: Vec<ResourceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub pattern: String,
    pub name: String,
    pub template: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Catalog {
    pub fn collect(tools: &ToolRegistry, resources: &ResourceRegistry) -> Self {
        let tools = tools
            .iter()
            .map(|tool| ToolSummary {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                arguments: tool
                    .input_schema()
                    .fields()
                    .map(|(name, spec)| ArgumentSummary {
                        name: name.to_string(),
                        field_type: spec.field_type,
                        required: spec.required,
                        description: spec.description.clone(),
                    })
                    .collect(),
            })
            .collect();

        let resources = resources
            .iter()
            .map(|resource| ResourceSummary {
                pattern: resource.pattern().as_str().to_string(),
                name: resource.name().to_string(),
                template: resource.pattern().is_template(),
                description: resource.description().map(str::to_string),
                mime_type: resource.mime_type().map(str::to_string),
            })
            .collect();

        Self { tools, resources }
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name.as_str())
    }
}
