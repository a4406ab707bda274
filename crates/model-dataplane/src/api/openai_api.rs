//! OpenAI-compatible routes under `/openai/v1`.
//!
//! Errors here are OpenAI error objects, not `{"error": "..."}` strings.
//! A model without the requested capability gets a 400 naming the API.

use super::{extract_headers, json_response, AppState};
use crate::dataplane::ReadinessPolicy;
use crate::error::{DataplaneError, Result};
use crate::model::{Headers, Model};
use crate::openai::sse::into_frames;
use crate::openai::types::{
    unix_now, ChatCompletionRequest, CompletionRequest, EmbeddingRequest, ErrorResponse, RerankRequest,
};
use crate::openai::{OpenAIEncoderModel, OpenAIGenerativeModel, OpenAIOutput};
use bytes::Bytes;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Capability mismatch, answered with a 400 `ErrorResponse`.
struct Unsupported(ErrorResponse);

enum Outcome {
    Ok(Response),
    Unsupported(Unsupported),
    Failed(DataplaneError),
}

impl From<Result<Response>> for Outcome {
    fn from(result: Result<Response>) -> Self {
        match result {
            Ok(response) => Outcome::Ok(response),
            Err(err) => Outcome::Failed(err),
        }
    }
}

fn error_body(body: &ErrorResponse) -> Response {
    json_response(
        StatusCode::from_u16(body.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
}

fn finish(route: &str, outcome: Outcome) -> Response {
    let response = match outcome {
        Outcome::Ok(response) => response,
        Outcome::Unsupported(Unsupported(body)) => {
            debug!("{}", body.error.message);
            error_body(&body)
        }
        Outcome::Failed(err) => {
            if err.status_code() >= 500 {
                error!("OpenAI request failed: {}", err);
            }
            error_body(&ErrorResponse::from(&err))
        }
    };
    crate::metrics::inc_request(route, response.status().as_str());
    response
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

fn sse_response<C>(chunks: BoxStream<'static, Result<C>>) -> Response
where
    C: Serialize + Send + 'static,
{
    let frames = into_frames(chunks).map(Ok::<_, Infallible>);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream"), (header::CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames),
    )
        .into_response()
}

fn full_or_stream<T, C>(output: OpenAIOutput<T, C>) -> Response
where
    T: Serialize,
    C: Serialize + Send + 'static,
{
    match output {
        OpenAIOutput::Full(body) => json_response(StatusCode::OK, &body),
        OpenAIOutput::Stream(chunks) => sse_response(chunks),
    }
}

async fn resolve_model(dp: &AppState, name: &str) -> Result<Arc<dyn Model>> {
    dp.get_model(name, ReadinessPolicy::Strict).await
}

fn require_generative<'a>(model: &'a Arc<dyn Model>, api: &str) -> std::result::Result<&'a dyn OpenAIGenerativeModel, Unsupported> {
    model
        .as_generative()
        .ok_or_else(|| Unsupported(ErrorResponse::unsupported_api(model.name(), api)))
}

fn require_encoder<'a>(model: &'a Arc<dyn Model>, api: &str) -> std::result::Result<&'a dyn OpenAIEncoderModel, Unsupported> {
    model
        .as_encoder()
        .ok_or_else(|| Unsupported(ErrorResponse::unsupported_api(model.name(), api)))
}

/// POST /openai/v1/completions
pub async fn completions(State(dp): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let route = "/openai/v1/completions";
    let headers = extract_headers(&headers);
    let request: CompletionRequest = match parse(&body) {
        Ok(r) => r,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let model = match resolve_model(&dp, &request.model).await {
        Ok(m) => m,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let generator = match require_generative(&model, "completions") {
        Ok(g) => g,
        Err(u) => return finish(route, Outcome::Unsupported(u)),
    };
    let start = Instant::now();
    let output = generator.create_completion(request, &headers).await;
    dp.record(model.name(), "completions", start, &headers);
    finish(route, output.map(full_or_stream).into())
}

/// POST /openai/v1/chat/completions
pub async fn chat_completions(State(dp): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let route = "/openai/v1/chat/completions";
    let headers = extract_headers(&headers);
    let request: ChatCompletionRequest = match parse(&body) {
        Ok(r) => r,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let model = match resolve_model(&dp, &request.model).await {
        Ok(m) => m,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let generator = match require_generative(&model, "chat completions") {
        Ok(g) => g,
        Err(u) => return finish(route, Outcome::Unsupported(u)),
    };
    let start = Instant::now();
    let output = generator.create_chat_completion(request, &headers).await;
    dp.record(model.name(), "chat_completions", start, &headers);
    finish(route, output.map(full_or_stream).into())
}

/// POST /openai/v1/embeddings
pub async fn embeddings(State(dp): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let route = "/openai/v1/embeddings";
    let headers = extract_headers(&headers);
    let request: EmbeddingRequest = match parse(&body) {
        Ok(r) => r,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let model = match resolve_model(&dp, &request.model).await {
        Ok(m) => m,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let encoder = match require_encoder(&model, "embeddings") {
        Ok(e) => e,
        Err(u) => return finish(route, Outcome::Unsupported(u)),
    };
    finish(route, timed(&dp, &model, "embeddings", &headers, encoder.create_embedding(request, &headers)).await)
}

/// POST /openai/v1/rerank
pub async fn rerank(State(dp): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let route = "/openai/v1/rerank";
    let headers = extract_headers(&headers);
    let request: RerankRequest = match parse(&body) {
        Ok(r) => r,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let model = match resolve_model(&dp, &request.model).await {
        Ok(m) => m,
        Err(e) => return finish(route, Outcome::Failed(e)),
    };
    let encoder = match require_encoder(&model, "rerank") {
        Ok(e) => e,
        Err(u) => return finish(route, Outcome::Unsupported(u)),
    };
    finish(route, timed(&dp, &model, "rerank", &headers, encoder.create_rerank(request, &headers)).await)
}

async fn timed<T, F>(dp: &AppState, model: &Arc<dyn Model>, kind: &str, headers: &Headers, call: F) -> Outcome
where
    T: Serialize,
    F: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = call.await;
    dp.record(model.name(), kind, start, headers);
    result.map(|body| json_response(StatusCode::OK, &body)).into()
}

/// GET /openai/v1/models
pub async fn list_models(State(dp): State<AppState>) -> Response {
    let created = unix_now();
    let data: Vec<serde_json::Value> = dp
        .registry()
        .models()
        .into_iter()
        .filter(|m| m.as_generative().is_some() || m.as_encoder().is_some())
        .map(|m| {
            serde_json::json!({
                "id": m.name(),
                "object": "model",
                "created": created,
                "owned_by": crate::dataplane::SERVER_NAME,
            })
        })
        .collect();
    finish(
        "/openai/v1/models",
        Outcome::Ok(json_response(StatusCode::OK, &serde_json::json!({ "object": "list", "data": data }))),
    )
}
