//! Completion model built on a token generator.
//!
//! Handles the request-level rules (`n`, `best_of`, `echo`, `max_tokens`)
//! and streaming, so a backend only has to produce tokens.

use super::chat::{ChatAdapter, ChatTemplate, RolePrefixTemplate};
use super::types::{unix_now, ChatCompletionRequest, Completion, CompletionChoice, CompletionRequest, Usage};
use super::{ChatOutput, CompletionOutput, OpenAIGenerativeModel, OpenAIOutput};
use crate::error::{DataplaneError, Result};
use crate::model::{Headers, Model, ReadyFlag};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MAX_TOKENS: u32 = 16;

/// Upper bound on prompts times `n` for one request.
pub const MAX_CHOICES: usize = 128;

pub trait TokenGenerator: Send + Sync {
    fn count_tokens(&self, text: &str) -> u32;

    /// Token texts in generation order. Ending the stream means "stop".
    fn generate(&self, prompt: &str, max_tokens: u32) -> BoxStream<'static, Result<String>>;
}

/// Generates the prompt's own words back, one word per token.
pub struct EchoTokenGenerator;

impl TokenGenerator for EchoTokenGenerator {
    fn count_tokens(&self, text: &str) -> u32 {
        text.split_whitespace().count() as u32
    }

    fn generate(&self, prompt: &str, max_tokens: u32) -> BoxStream<'static, Result<String>> {
        let tokens: Vec<Result<String>> = prompt
            .split_whitespace()
            .take(max_tokens as usize)
            .map(|word| Ok(format!(" {}", word)))
            .collect();
        futures::stream::iter(tokens).boxed()
    }
}

struct Plan {
    prompts: Vec<String>,
    n: u32,
    echo: bool,
    max_tokens: u32,
}

impl Plan {
    fn from_request(request: &CompletionRequest) -> Result<Self> {
        let n = request.n.unwrap_or(1);
        if n == 0 {
            return Err(DataplaneError::invalid_input("n must be at least 1"));
        }
        if let Some(best_of) = request.best_of {
            if best_of < n {
                return Err(DataplaneError::invalid_input(format!(
                    "best_of must be greater than or equal to n, got n={} and best_of={}",
                    n, best_of
                )));
            }
            if request.is_stream() && best_of != n {
                return Err(DataplaneError::invalid_input("best_of must equal n when streaming"));
            }
        }
        let prompts = request.prompt.texts();
        if prompts.is_empty() {
            return Err(DataplaneError::invalid_input("prompt must not be empty"));
        }
        let choices = prompts.len().saturating_mul(n as usize);
        if choices > MAX_CHOICES {
            return Err(DataplaneError::invalid_input(format!(
                "{} prompt(s) with n={} exceeds the limit of {} choices",
                prompts.len(),
                n,
                MAX_CHOICES
            )));
        }
        Ok(Self {
            prompts,
            n,
            echo: request.echo.unwrap_or(false),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    fn finish_reason(&self, generated: u32) -> &'static str {
        if generated >= self.max_tokens {
            "length"
        } else {
            "stop"
        }
    }
}

fn chunk(id: &str, created: i64, model: &str, index: u32, text: String, finish_reason: Option<&str>, usage: Option<Usage>) -> Completion {
    Completion {
        id: id.to_string(),
        object: "text_completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![CompletionChoice {
            index,
            text,
            logprobs: None,
            finish_reason: finish_reason.map(str::to_string),
        }],
        usage,
    }
}

pub struct GeneratedCompletionModel {
    name: String,
    generator: Arc<dyn TokenGenerator>,
    chat: ChatAdapter,
    ready: ReadyFlag,
}

impl GeneratedCompletionModel {
    pub fn new(name: &str, generator: Arc<dyn TokenGenerator>) -> Self {
        Self {
            name: name.to_string(),
            generator,
            chat: ChatAdapter::new(Arc::new(RolePrefixTemplate)),
            ready: ReadyFlag::default(),
        }
    }

    pub fn with_template(mut self, template: Arc<dyn ChatTemplate>) -> Self {
        self.chat = ChatAdapter::new(template);
        self
    }

    async fn complete_full(&self, plan: Plan, id: String, created: i64) -> Result<Completion> {
        let mut choices = Vec::new();
        let mut prompt_tokens = 0;
        let mut completion_tokens = 0;
        for (i, prompt) in plan.prompts.iter().enumerate() {
            let counted = self.generator.count_tokens(prompt);
            for j in 0..plan.n {
                let mut generated = String::new();
                let mut count = 0u32;
                if plan.max_tokens > 0 {
                    let mut tokens = self.generator.generate(prompt, plan.max_tokens);
                    while let Some(token) = tokens.next().await {
                        generated.push_str(&token?);
                        count += 1;
                        if count >= plan.max_tokens {
                            break;
                        }
                    }
                }
                prompt_tokens += counted;
                completion_tokens += count;
                let text = if plan.echo { format!("{}{}", prompt, generated) } else { generated };
                choices.push(CompletionChoice {
                    index: i as u32 * plan.n + j,
                    text,
                    logprobs: None,
                    finish_reason: Some(plan.finish_reason(count).to_string()),
                });
            }
        }
        Ok(Completion {
            id,
            object: "text_completion".to_string(),
            created,
            model: self.name.clone(),
            choices,
            usage: Some(Usage::new(prompt_tokens, completion_tokens)),
        })
    }

    fn complete_stream(&self, plan: Plan, id: String, created: i64) -> BoxStream<'static, Result<Completion>> {
        let generator = self.generator.clone();
        let model = self.name.clone();
        let stream = async_stream::try_stream! {
            for (i, prompt) in plan.prompts.iter().enumerate() {
                let prompt_tokens = generator.count_tokens(prompt);
                for j in 0..plan.n {
                    let index = i as u32 * plan.n + j;
                    // echo text rides on the first chunk of each choice
                    let mut prefix = if plan.echo { prompt.clone() } else { String::new() };
                    let mut pending: Option<String> = None;
                    let mut count = 0u32;
                    if plan.max_tokens > 0 {
                        let mut tokens = generator.generate(prompt, plan.max_tokens);
                        while let Some(token) = tokens.next().await {
                            let token = token?;
                            count += 1;
                            if let Some(previous) = pending.replace(token) {
                                let text = std::mem::take(&mut prefix) + &previous;
                                yield chunk(&id, created, &model, index, text, None, None);
                            }
                            if count >= plan.max_tokens {
                                break;
                            }
                        }
                    }
                    let text = std::mem::take(&mut prefix) + &pending.take().unwrap_or_default();
                    let usage = Usage::new(prompt_tokens, count);
                    yield chunk(&id, created, &model, index, text, Some(plan.finish_reason(count)), Some(usage));
                }
            }
        };
        Box::pin(stream)
    }
}

#[async_trait]
impl Model for GeneratedCompletionModel {
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

    fn as_generative(&self) -> Option<&dyn OpenAIGenerativeModel> {
        Some(self)
    }
}

#[async_trait]
impl OpenAIGenerativeModel for GeneratedCompletionModel {
    async fn create_completion(&self, request: CompletionRequest, _headers: &Headers) -> Result<CompletionOutput> {
        let plan = Plan::from_request(&request)?;
        let id = format!("cmpl-{}", uuid::Uuid::new_v4().simple());
        let created = unix_now();
        debug!("Completion {} for {} prompt(s), n={}", id, plan.prompts.len(), plan.n);
        if request.is_stream() {
            Ok(OpenAIOutput::Stream(self.complete_stream(plan, id, created)))
        } else {
            Ok(OpenAIOutput::Full(self.complete_full(plan, id, created).await?))
        }
    }

    async fn create_chat_completion(&self, request: ChatCompletionRequest, headers: &Headers) -> Result<ChatOutput> {
        let completion_request = self.chat.to_completion_request(request)?;
        let output = self.create_completion(completion_request, headers).await?;
        Ok(self.chat.adapt(output))
    }
}
