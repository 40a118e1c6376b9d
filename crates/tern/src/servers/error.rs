use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while a tool server handles a call. These are soft: the
/// router folds them into a structured function result for the model.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool server transport failed: {0}")]
    Transport(String),

    #[error("Tool call timed out after {0}s")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::ExecutionError(_) => "execution_error",
            ToolError::Transport(_) => "transport_error",
            ToolError::Timeout(_) => "timeout",
            ToolError::Internal(_) => "internal_error",
        }
    }

    /// Hint for the model on how to recover
    pub fn suggestion(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => {
                "Only call functions that were offered in this conversation."
            }
            ToolError::InvalidParameters(_) => {
                "Check the arguments against the function's parameter schema and call it again."
            }
            ToolError::ExecutionError(_) => {
                "The tool ran but failed. Adjust the arguments or tell the user what went wrong."
            }
            ToolError::Transport(_) | ToolError::Timeout(_) => {
                "The tool server may be unavailable. Retry later or continue without this tool."
            }
            ToolError::Internal(_) => "Continue without this tool and report the failure.",
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_snake_case() {
        assert_eq!(ToolError::ToolNotFound("x".into()).kind(), "tool_not_found");
        assert_eq!(ToolError::Timeout(5).kind(), "timeout");
        assert_eq!(ToolError::Timeout(5).to_string(), "Tool call timed out after 5s");
    }

    #[test]
    fn test_round_trips_through_json() {
        let error = ToolError::InvalidParameters("missing uri".to_string());
        let json = serde_json::to_string(&error).unwrap();
        let back: ToolError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, back);
    }
}
