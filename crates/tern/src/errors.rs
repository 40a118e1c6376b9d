use thiserror::Error;

use crate::router::RouterError;

/// Failures that abort a whole completion request
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("The model `{0}` does not exist")]
    UnknownModel(String),

    #[error("Tool routing failed: {0}")]
    Router(#[from] RouterError),

    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Failed to render system instruction: {0}")]
    Template(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn backend(error: anyhow::Error) -> Self {
        // alternate formatting keeps the whole context chain
        EngineError::Backend(format!("{:#}", error))
    }

    /// Short machine readable category, used in error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request_error",
            EngineError::UnknownModel(_) => "model_not_found",
            EngineError::Router(_) => "tool_routing_error",
            EngineError::Backend(_) => "backend_error",
            EngineError::Template(_) => "template_error",
            EngineError::Cancelled => "cancelled",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
