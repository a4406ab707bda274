//! Model repository extension: load and unload by name.

use super::{finish, json_response, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde_json::json;
use tracing::info;

/// POST /v2/repository/models/{name}/load
pub async fn load(State(dp): State<AppState>, Path(name): Path<String>) -> Response {
    info!("Repository load requested for {}", name);
    let result = dp
        .load_model(&name)
        .await
        .map(|()| json_response(StatusCode::OK, &json!({ "name": name, "load": true })));
    finish("/v2/repository/models/{name}/load", result)
}

/// POST /v2/repository/models/{name}/unload
pub async fn unload(State(dp): State<AppState>, Path(name): Path<String>) -> Response {
    info!("Repository unload requested for {}", name);
    let result = dp
        .unload_model(&name)
        .await
        .map(|()| json_response(StatusCode::OK, &json!({ "name": name, "unload": true })));
    finish("/v2/repository/models/{name}/unload", result)
}
