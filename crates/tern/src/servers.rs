use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::content::Content;
use crate::models::role::Role;

pub mod error;
pub mod jsonrpc;
pub mod memory;

use error::{ToolError, ToolResult};

/// A tool as listed by a tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// One conversational message produced by expanding a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

/// An external capability provider. Listing methods are called once at
/// registration; the call methods are used by the router during a request.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Human readable server name, used in logs and error payloads
    fn name(&self) -> &str;

    async fn list_tools(&self) -> ToolResult<Vec<ToolInfo>>;

    async fn list_resources(&self) -> ToolResult<Vec<ResourceInfo>> {
        Ok(Vec::new())
    }

    async fn list_resource_templates(&self) -> ToolResult<Vec<ResourceTemplateInfo>> {
        Ok(Vec::new())
    }

    async fn list_prompts(&self) -> ToolResult<Vec<PromptInfo>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>)
        -> ToolResult<Vec<Content>>;

    async fn read_resource(&self, uri: &str) -> ToolResult<Vec<Content>> {
        Err(ToolError::ToolNotFound(format!(
            "{} does not serve resources (requested {})",
            self.name(),
            uri
        )))
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> ToolResult<Vec<PromptMessage>> {
        Err(ToolError::ToolNotFound(format!(
            "{} does not serve prompts (requested {})",
            self.name(),
            name
        )))
    }
}
