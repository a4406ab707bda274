// model-dataplane/src/api/mod.rs
//! REST bindings - v1, v2, repository and OpenAI routes over one `DataPlane`

pub mod openai_api;
pub mod repository_api;
pub mod v1_api;
pub mod v2_api;

use crate::dataplane::DataPlane;
use crate::error::DataplaneError;
use crate::model::Headers;
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

pub type AppState = Arc<DataPlane>;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response(),
        Err(e) => {
            error!("Failed to encode response body: {}", e);
            let body = serde_json::json!({ "error": format!("failed to encode response: {}", e) });
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
                body.to_string(),
            )
                .into_response()
        }
    }
}

/// `{"error": "<message>"}` with the status the error maps to.
pub fn error_response(err: &DataplaneError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    json_response(status, &serde_json::json!({ "error": err.to_string() }))
}

/// Lower-cased header map handed to models.
pub fn extract_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

/// Counts the request under `route` and turns an error into its response.
pub fn finish(route: &str, result: crate::error::Result<Response>) -> Response {
    let response = match result {
        Ok(response) => response,
        Err(err) => error_response(&err),
    };
    crate::metrics::inc_request(route, response.status().as_str());
    response
}

pub async fn not_found() -> Response {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "Not Found" }))
}
