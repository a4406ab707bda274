//! v1 REST protocol: `instances` in, `predictions` out.
//!
//! Verbs ride on the last path segment (`/v1/models/{name}:predict`), so
//! the model route captures the whole segment and splits it here.
//! Models that are registered but not ready get one lazy load attempt.

use super::{extract_headers, finish, json_response, AppState};
use crate::dataplane::ReadinessPolicy;
use crate::error::{DataplaneError, Result};
use crate::model::{validate_v1, Payload, Prediction};
use crate::tensor::rest;
use bytes::Bytes;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Predict,
    Explain,
}

fn split_verb(segment: &str) -> Option<(&str, Verb)> {
    let (name, verb) = segment.rsplit_once(':')?;
    match verb {
        "predict" => Some((name, Verb::Predict)),
        "explain" => Some((name, Verb::Explain)),
        _ => None,
    }
}

/// GET /
pub async fn live(State(dp): State<AppState>) -> Response {
    finish("/", Ok(json_response(StatusCode::OK, &dp.live())))
}

/// GET /v1/models
pub async fn list_models(State(dp): State<AppState>) -> Response {
    finish("/v1/models", Ok(json_response(StatusCode::OK, &json!({ "models": dp.models() }))))
}

/// GET /v1/models/{name}
pub async fn model_ready(State(dp): State<AppState>, Path(name): Path<String>) -> Response {
    let result = async {
        if !dp.model_ready(&name).await? {
            return Err(DataplaneError::ModelNotReady(name.clone()));
        }
        Ok(json_response(StatusCode::OK, &json!({ "name": name, "ready": true })))
    }
    .await;
    finish("/v1/models/{name}", result)
}

/// POST /v1/models/{name}:predict and /v1/models/{name}:explain
pub async fn model_verb(
    State(dp): State<AppState>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((name, verb)) = split_verb(&segment) else {
        return finish(
            "/v1/models/{name}:verb",
            Ok(json_response(
                StatusCode::NOT_FOUND,
                &json!({ "error": format!("Unsupported v1 route: {}", segment) }),
            )),
        );
    };
    let route = match verb {
        Verb::Predict => "/v1/models/{name}:predict",
        Verb::Explain => "/v1/models/{name}:explain",
    };
    finish(route, handle(&dp, name, verb, &headers, &body).await)
}

async fn handle(dp: &AppState, name: &str, verb: Verb, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    validate_v1(&value)?;
    let headers = extract_headers(headers);
    let payload = Payload::Json(value);
    let prediction = match verb {
        Verb::Predict => dp.infer(name, payload, &headers, ReadinessPolicy::LazyLoad).await?,
        Verb::Explain => dp.explain(name, payload, &headers, ReadinessPolicy::LazyLoad).await?,
    };
    Ok(match prediction {
        Prediction::Json(value) => json_response(StatusCode::OK, &value),
        Prediction::Infer(response) => json_response(StatusCode::OK, &rest::encode_response(&response)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_verb() {
        assert_eq!(split_verb("iris:predict"), Some(("iris", Verb::Predict)));
        assert_eq!(split_verb("a:b:explain"), Some(("a:b", Verb::Explain)));
        assert_eq!(split_verb("iris:train"), None);
        assert_eq!(split_verb("iris"), None);
    }
}
