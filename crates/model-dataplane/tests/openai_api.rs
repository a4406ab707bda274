mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{post_json, router_with};
use model_dataplane::model::{Headers, Model, ReadyFlag};
use model_dataplane::openai::generation::EchoTokenGenerator;
use model_dataplane::openai::types::{
    Embedding, EmbeddingData, EmbeddingRequest, Rerank, RerankDocument, RerankRequest, RerankResult, Usage,
};
use model_dataplane::openai::{GeneratedCompletionModel, OpenAIEncoderModel};
use model_dataplane::Result;
use serde_json::json;
use std::sync::Arc;

/// Embeds each text as `[len, words]` and ranks documents by shared words.
struct BagOfWords {
    ready: ReadyFlag,
}

#[async_trait]
impl Model for BagOfWords {
    fn name(&self) -> &str {
        "bow"
    }

    fn ready(&self) -> bool {
        self.ready.get()
    }

    async fn load(&self) -> Result<bool> {
        self.ready.set(true);
        Ok(true)
    }

    fn as_encoder(&self) -> Option<&dyn OpenAIEncoderModel> {
        Some(self)
    }
}

#[async_trait]
impl OpenAIEncoderModel for BagOfWords {
    async fn create_embedding(&self, request: EmbeddingRequest, _headers: &Headers) -> Result<Embedding> {
        let texts = request.input.texts();
        let tokens: u32 = texts.iter().map(|t| t.split_whitespace().count() as u32).sum();
        Ok(Embedding {
            object: "list".into(),
            model: request.model,
            data: texts
                .iter()
                .enumerate()
                .map(|(i, t)| EmbeddingData {
                    index: i as u32,
                    object: "embedding".into(),
                    embedding: vec![t.len() as f32, t.split_whitespace().count() as f32],
                })
                .collect(),
            usage: Usage::new(tokens, 0),
        })
    }

    async fn create_rerank(&self, request: RerankRequest, _headers: &Headers) -> Result<Rerank> {
        let query: Vec<&str> = request.query.split_whitespace().collect();
        let mut results: Vec<RerankResult> = request
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| RerankResult {
                index: i as u32,
                relevance_score: doc.split_whitespace().filter(|w| query.contains(w)).count() as f32,
                document: request.return_documents.unwrap_or(false).then(|| RerankDocument { text: doc.clone() }),
            })
            .collect();
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        Ok(Rerank {
            id: "rerank-1".into(),
            model: request.model,
            results,
            usage: None,
        })
    }
}

async fn models() -> Vec<Arc<dyn Model>> {
    let generator = Arc::new(GeneratedCompletionModel::new("gen", Arc::new(EchoTokenGenerator)));
    generator.load().await.unwrap();
    let encoder = Arc::new(BagOfWords { ready: ReadyFlag::default() });
    encoder.load().await.unwrap();
    vec![generator, encoder]
}

fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| frame.strip_prefix("data: ").expect("every frame is a data line").to_string())
        .collect()
}

#[tokio::test]
async fn test_embedding_against_generative_model_is_400() {
    let (app, _) = router_with(models().await);
    let reply = post_json(&app, "/openai/v1/embeddings", &json!({"model": "gen", "input": "hi"})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let err = reply.json();
    assert_eq!(err["error"]["code"], "400");
    assert_eq!(err["error"]["message"], "Model gen does not support embeddings API");

    let reply = post_json(&app, "/openai/v1/completions", &json!({"model": "bow", "prompt": "hi"})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"]["message"], "Model bow does not support completions API");
}

#[tokio::test]
async fn test_completion_full() {
    let (app, _) = router_with(models().await);
    let reply = post_json(
        &app,
        "/openai/v1/completions",
        &json!({"model": "gen", "prompt": "one two", "max_tokens": 8}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["object"], "text_completion");
    assert_eq!(body["choices"][0]["text"], " one two");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 4);
}

#[tokio::test]
async fn test_completion_stream_ends_with_single_done() {
    let (app, _) = router_with(models().await);
    let reply = post_json(
        &app,
        "/openai/v1/completions",
        &json!({"model": "gen", "prompt": "a b c", "max_tokens": 2, "stream": true}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.content_type().starts_with("text/event-stream"));
    let text = reply.text();
    assert!(text.ends_with("data: [DONE]\n\n"));
    assert_eq!(text.matches("[DONE]").count(), 1);

    let payloads = sse_payloads(&text);
    assert_eq!(payloads.len(), 3);
    let last: serde_json::Value = serde_json::from_str(&payloads[1]).unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "length");
}

#[tokio::test]
async fn test_chat_completion_full_and_stream() {
    let (app, _) = router_with(models().await);
    let messages = json!([{"role": "user", "content": "hello there"}]);

    let reply = post_json(
        &app,
        "/openai/v1/chat/completions",
        &json!({"model": "gen", "messages": messages, "max_tokens": 2}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], " user: hello");

    let reply = post_json(
        &app,
        "/openai/v1/chat/completions",
        &json!({"model": "gen", "messages": messages, "max_tokens": 2, "stream": true}),
    )
    .await;
    let payloads = sse_payloads(&reply.text());
    let first: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(first["object"], "chat.completion.chunk");
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(payloads.last().unwrap(), "[DONE]");
}

#[tokio::test]
async fn test_encoder_routes() {
    let (app, _) = router_with(models().await);
    let reply = post_json(
        &app,
        "/openai/v1/embeddings",
        &json!({"model": "bow", "input": ["a b", "c"]}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["data"][0]["embedding"], json!([3.0, 2.0]));
    assert_eq!(body["data"][1]["index"], 1);

    let reply = post_json(
        &app,
        "/openai/v1/rerank",
        &json!({"model": "bow", "query": "red fox", "documents": ["blue sky", "red fox jumps"], "return_documents": true}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["results"][0]["index"], 1);
    assert_eq!(body["results"][0]["document"]["text"], "red fox jumps");
}

#[tokio::test]
async fn test_openai_errors_are_error_objects() {
    let (app, _) = router_with(models().await);

    let reply = post_json(&app, "/openai/v1/completions", &json!({"model": "nope", "prompt": "x"})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["error"]["code"], "404");

    let reply = post_json(&app, "/openai/v1/completions", &json!({"prompt": "x"})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"]["type"], "BadRequestError");

    let reply = post_json(
        &app,
        "/openai/v1/completions",
        &json!({"model": "gen", "prompt": "x", "n": 2, "best_of": 1}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_models_listing() {
    let (app, _) = router_with(models().await);
    let reply = common::get(&app, "/openai/v1/models").await;
    let mut ids: Vec<String> = reply.json()["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["bow".to_string(), "gen".to_string()]);
}
