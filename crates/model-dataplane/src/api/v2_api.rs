//! v2 (open inference protocol) REST routes.

use super::{extract_headers, finish, json_response, AppState};
use crate::dataplane::ReadinessPolicy;
use crate::error::Result;
use crate::model::{Payload, Prediction};
use crate::tensor::rest;
use bytes::Bytes;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde_json::json;

/// GET /v2
pub async fn server_metadata(State(dp): State<AppState>) -> Response {
    finish("/v2", Ok(json_response(StatusCode::OK, &dp.metadata())))
}

/// GET /v2/health/live
pub async fn live() -> Response {
    finish("/v2/health/live", Ok(json_response(StatusCode::OK, &json!({ "live": true }))))
}

/// GET /v2/health/ready
pub async fn ready(State(dp): State<AppState>) -> Response {
    let ready = dp.ready().await;
    finish("/v2/health/ready", Ok(json_response(StatusCode::OK, &json!({ "ready": ready }))))
}

/// GET /v2/models/{name}
pub async fn model_metadata(State(dp): State<AppState>, Path(name): Path<String>) -> Response {
    let result = dp
        .model_metadata(&name)
        .map(|meta| json_response(StatusCode::OK, &meta));
    finish("/v2/models/{name}", result)
}

/// GET /v2/models/{name}/ready. 503 with the same body while loading.
pub async fn model_ready(State(dp): State<AppState>, Path(name): Path<String>) -> Response {
    let result = dp.model_ready(&name).await.map(|ready| {
        let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
        json_response(status, &json!({ "name": name, "ready": ready }))
    });
    finish("/v2/models/{name}/ready", result)
}

/// POST /v2/models/{name}/infer
pub async fn infer(
    State(dp): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    finish("/v2/models/{name}/infer", run(&dp, &name, false, &headers, &body).await)
}

/// POST /v2/models/{name}/explain
pub async fn explain(
    State(dp): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    finish("/v2/models/{name}/explain", run(&dp, &name, true, &headers, &body).await)
}

async fn run(dp: &AppState, name: &str, explain: bool, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    let request = rest::decode_request(name, body)?;
    let request_id = request
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let headers = extract_headers(headers);
    let payload = Payload::Infer(request);
    let prediction = if explain {
        dp.explain(name, payload, &headers, ReadinessPolicy::Strict).await?
    } else {
        dp.infer(name, payload, &headers, ReadinessPolicy::Strict).await?
    };
    Ok(match prediction {
        Prediction::Infer(mut response) => {
            response.id = Some(response.id.unwrap_or(request_id));
            json_response(StatusCode::OK, &rest::encode_response(&response)?)
        }
        Prediction::Json(value) => json_response(StatusCode::OK, &value),
    })
}
