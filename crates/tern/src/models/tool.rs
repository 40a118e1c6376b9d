use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::servers::error::ToolError;

/// The backend facing materialization of one capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDescriptor {
    /// Encoded name, decodable back to the owning server and capability
    pub name: String,
    /// A description of what the function does
    pub description: String,
    /// Translated parameter schema
    pub parameters: Value,
}

impl FunctionDescriptor {
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        FunctionDescriptor {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call as emitted by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Encoded function name
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl FunctionCall {
    pub fn new<S: Into<String>>(name: S, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from any json value, treating non-objects as empty arguments
    pub fn from_value<S: Into<String>>(name: S, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }
}

/// The answer to one function call, fed back to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResult {
    pub name: String,
    pub response: Map<String, Value>,
}

impl FunctionResult {
    pub fn success<S: Into<String>>(name: S, response: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            response,
        }
    }

    /// Structured error payload for a failed invocation
    pub fn failure<S: Into<String>>(
        name: S,
        error: &ToolError,
        tool_name: &str,
        server_name: &str,
    ) -> Self {
        let mut response = Map::new();
        response.insert("error".to_string(), Value::Bool(true));
        response.insert("error_type".to_string(), Value::from(error.kind()));
        response.insert("error_message".to_string(), Value::from(error.to_string()));
        response.insert("tool_name".to_string(), Value::from(tool_name));
        response.insert("server_name".to_string(), Value::from(server_name));
        response.insert("suggestion".to_string(), Value::from(error.suggestion()));
        Self {
            name: name.into(),
            response,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.response.get("error"), Some(Value::Bool(true)))
    }
}
