use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tern::errors::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration, set the environment variable {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Deserialization errors only name the leaf field; these live under `provider`
const PROVIDER_FIELDS: &[&str] = &["type", "api_key"];

/// Map a configuration key to the environment variable that sets it
pub fn to_env_var(field: &str) -> String {
    let path = if PROVIDER_FIELDS.contains(&field) {
        format!("provider.{}", field)
    } else {
        field.to_string()
    };
    format!("TERN_{}", path.replace('.', "__").to_uppercase())
}

/// An HTTP error rendered with the OpenAI error envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: &'static str, message: S) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed",
        )
    }

    fn error_type(&self) -> &'static str {
        if self.status.is_server_error() {
            "server_error"
        } else {
            "invalid_request_error"
        }
    }
}

/// Route fallback for a known path hit with the wrong method
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::UnknownModel(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", error);
        }
        Self::new(status, error.kind(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "message": self.message,
                "type": self.error_type(),
                "code": self.code,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider"), "TERN_PROVIDER");
        assert_eq!(to_env_var("api_key"), "TERN_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "TERN_PROVIDER__TYPE");
        assert_eq!(to_env_var("server.port"), "TERN_SERVER__PORT");
    }

    #[test]
    fn test_engine_error_status() {
        let cases = vec![
            (
                EngineError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::UnknownModel("m9".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::Backend("quota".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                EngineError::Template("oops".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response =
            ApiError::from(EngineError::UnknownModel("m9".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["message"], "The model `m9` does not exist");
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "model_not_found");
    }
}
