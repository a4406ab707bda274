//! Generative model that forwards requests to an OpenAI-compatible server.

use super::types::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, Completion, CompletionRequest, ErrorResponse};
use super::{ChatOutput, CompletionOutput, OpenAIGenerativeModel, OpenAIOutput};
use crate::error::{DataplaneError, Result, UpstreamError};
use crate::model::{Headers, Model, ReadyFlag};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Request and response rewrite points around the upstream call.
pub trait ProxyHooks: Send + Sync {
    fn preprocess_completion_request(&self, request: CompletionRequest) -> CompletionRequest {
        request
    }

    fn preprocess_chat_completion_request(&self, request: ChatCompletionRequest) -> ChatCompletionRequest {
        request
    }

    fn postprocess_completion(&self, completion: Completion) -> Completion {
        completion
    }

    fn postprocess_completion_chunk(&self, chunk: Completion) -> Completion {
        chunk
    }

    fn postprocess_chat_completion(&self, completion: ChatCompletion) -> ChatCompletion {
        completion
    }

    fn postprocess_chat_completion_chunk(&self, chunk: ChatCompletionChunk) -> ChatCompletionChunk {
        chunk
    }
}

pub struct NoHooks;

impl ProxyHooks for NoHooks {}

pub struct OpenAIProxyModel {
    name: String,
    base_url: String,
    http_client: reqwest::Client,
    hooks: Arc<dyn ProxyHooks>,
    upstream_headers: Vec<(String, String)>,
    ready: ReadyFlag,
}

impl OpenAIProxyModel {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            hooks: Arc::new(NoHooks),
            upstream_headers: Vec::new(),
            ready: ReadyFlag::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ProxyHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Header sent with every upstream request, e.g. an API key.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.upstream_headers.push((key.to_string(), value.to_string()));
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.base_url)
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    async fn send<T: Serialize>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        debug!("Proxying {} request to {}", self.name, url);
        let mut request = self.http_client.post(url).json(body);
        for (key, value) in &self.upstream_headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| UpstreamError::from_reqwest(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream {} returned {}", url, status);
            return Err(UpstreamError::from_status(status.as_u16(), &body).into());
        }
        Ok(response)
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(|e| UpstreamError::from_reqwest(&e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DataplaneError::from(UpstreamError::InvalidResponse(e.to_string())))
}

fn parse_event<C: DeserializeOwned>(data: &str) -> Result<C> {
    match serde_json::from_str::<C>(data) {
        Ok(chunk) => Ok(chunk),
        Err(e) => match serde_json::from_str::<ErrorResponse>(data) {
            Ok(error) => Err(UpstreamError::Status(error).into()),
            Err(_) => Err(UpstreamError::InvalidResponse(format!("{}: {}", e, data)).into()),
        },
    }
}

enum SseLine<C> {
    Skip,
    Done,
    Chunk(C),
}

fn parse_line<C: DeserializeOwned>(raw: &[u8]) -> Result<SseLine<C>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| UpstreamError::InvalidResponse(format!("stream line is not valid UTF-8: {}", e)))?;
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    Ok(SseLine::Chunk(parse_event::<C>(data)?))
}

fn parse_stream<C, F>(response: reqwest::Response, postprocess: F) -> BoxStream<'static, Result<C>>
where
    C: DeserializeOwned + Send + 'static,
    F: Fn(C) -> C + Send + 'static,
{
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| DataplaneError::from(UpstreamError::from_reqwest(&e))));
    parse_sse(bytes, postprocess)
}

/// Parses an SSE byte stream into typed chunks. Lines are split on raw
/// bytes so a character cut between network chunks survives. Blank lines
/// and the upstream `[DONE]` sentinel are consumed here.
fn parse_sse<S, C, F>(bytes: S, postprocess: F) -> BoxStream<'static, Result<C>>
where
    S: futures_util::Stream<Item = Result<bytes::Bytes>> + Send + 'static,
    C: DeserializeOwned + Send + 'static,
    F: Fn(C) -> C + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures_util::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                match parse_line::<C>(&line)? {
                    SseLine::Skip => {}
                    SseLine::Done => return,
                    SseLine::Chunk(chunk) => yield postprocess(chunk),
                }
            }
        }
        // last line without a trailing newline
        if let SseLine::Chunk(chunk) = parse_line::<C>(&buffer)? {
            yield postprocess(chunk);
        }
    };
    Box::pin(stream)
}

#[async_trait]
impl Model for OpenAIProxyModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.ready.get()
    }

    async fn load(&self) -> Result<bool> {
        self.ready.set(true);
        Ok(true)
    }

    async fn stop(&self) {
        self.ready.set(false);
    }

    /// Healthy only when the upstream `/health` answers 200.
    async fn healthy(&self) -> bool {
        match self.http_client.get(self.health_url()).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                warn!("Upstream health check failed for {}: {}", self.name, e);
                false
            }
        }
    }

    fn as_generative(&self) -> Option<&dyn OpenAIGenerativeModel> {
        Some(self)
    }
}

#[async_trait]
impl OpenAIGenerativeModel for OpenAIProxyModel {
    async fn create_completion(&self, request: CompletionRequest, _headers: &Headers) -> Result<CompletionOutput> {
        let request = self.hooks.preprocess_completion_request(request);
        let response = self.send(&self.completions_url(), &request).await?;
        if request.is_stream() {
            let hooks = self.hooks.clone();
            Ok(OpenAIOutput::Stream(parse_stream(response, move |c| {
                hooks.postprocess_completion_chunk(c)
            })))
        } else {
            let completion: Completion = read_json(response).await?;
            Ok(OpenAIOutput::Full(self.hooks.postprocess_completion(completion)))
        }
    }

    async fn create_chat_completion(&self, request: ChatCompletionRequest, _headers: &Headers) -> Result<ChatOutput> {
        let request = self.hooks.preprocess_chat_completion_request(request);
        let response = self.send(&self.chat_completions_url(), &request).await?;
        if request.is_stream() {
            let hooks = self.hooks.clone();
            Ok(OpenAIOutput::Stream(parse_stream(response, move |c| {
                hooks.postprocess_chat_completion_chunk(c)
            })))
        } else {
            let completion: ChatCompletion = read_json(response).await?;
            Ok(OpenAIOutput::Full(self.hooks.postprocess_chat_completion(completion)))
        }
    }
}
