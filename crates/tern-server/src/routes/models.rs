use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tern::errors::EngineError;
use tern::models::api::{ModelList, ModelObject};

use crate::error::{method_not_allowed, ApiError};
use crate::state::AppState;

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(state.orchestrator.registry().model_list())
}

async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelObject>, ApiError> {
    state
        .orchestrator
        .registry()
        .model_detail(&id)
        .map(Json)
        .ok_or_else(|| EngineError::UnknownModel(id).into())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/models", get(list_models).fallback(method_not_allowed))
        // model ids may contain slashes
        .route(
            "/v1/models/*id",
            get(get_model).fallback(method_not_allowed),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tern::providers::mock::MockProvider;
    use tower::ServiceExt;

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        send("GET", uri).await
    }

    async fn send(method: &str, uri: &str) -> (StatusCode, Value) {
        let app = routes(test_state(MockProvider::new(vec![])).await);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_list_models() {
        let (status, body) = get_json("/v1/models").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "list");
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|model| model["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(body["data"][0]["object"], "model");
        assert_eq!(body["data"][0]["owned_by"], "tern");
    }

    #[tokio::test]
    async fn test_get_model() {
        let (status, body) = get_json("/v1/models/m2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "m2");
        assert!(body["created"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unknown_model_is_404() {
        let (status, body) = get_json("/v1/models/gpt-9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "model_not_found");
        assert_eq!(body["error"]["message"], "The model `gpt-9` does not exist");
    }

    #[tokio::test]
    async fn test_wrong_method_is_json_405() {
        for (method, uri) in [("POST", "/v1/models"), ("DELETE", "/v1/models/m1")] {
            let (status, body) = send(method, uri).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(body["error"]["code"], "method_not_allowed");
            assert_eq!(body["error"]["type"], "invalid_request_error");
        }
    }
}
