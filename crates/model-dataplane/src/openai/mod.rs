//! OpenAI-compatible capability interfaces and helpers.

pub mod chat;
pub mod generation;
pub mod proxy;
pub mod sse;
pub mod types;

use crate::error::Result;
use crate::model::Headers;
use async_trait::async_trait;
use futures::stream::BoxStream;
use types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, Completion, CompletionRequest, Embedding,
    EmbeddingRequest, Rerank, RerankRequest,
};

pub use chat::{ChatAdapter, ChatTemplate, RolePrefixTemplate};
pub use generation::{GeneratedCompletionModel, TokenGenerator};
pub use proxy::{OpenAIProxyModel, ProxyHooks};

/// One terminal object, or a stream of chunks in generation order.
pub enum OpenAIOutput<T, C> {
    Full(T),
    Stream(BoxStream<'static, Result<C>>),
}

pub type CompletionOutput = OpenAIOutput<Completion, Completion>;
pub type ChatOutput = OpenAIOutput<ChatCompletion, ChatCompletionChunk>;

#[async_trait]
pub trait OpenAIGenerativeModel: Send + Sync {
    async fn create_completion(&self, request: CompletionRequest, headers: &Headers) -> Result<CompletionOutput>;

    async fn create_chat_completion(&self, request: ChatCompletionRequest, headers: &Headers) -> Result<ChatOutput>;
}

#[async_trait]
pub trait OpenAIEncoderModel: Send + Sync {
    async fn create_embedding(&self, request: EmbeddingRequest, headers: &Headers) -> Result<Embedding>;

    async fn create_rerank(&self, request: RerankRequest, headers: &Headers) -> Result<Rerank>;
}
