//! Serving chat requests with a completion-only model.
//!
//! The message list is rendered to one prompt by a `ChatTemplate`, the
//! completion path runs, and the result is mapped back field by field.

use super::types::{
    ChatChoice, ChatChunkChoice, ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatDelta, ChatMessage,
    Completion, CompletionRequest, Prompt,
};
use super::{ChatOutput, CompletionOutput, OpenAIOutput};
use crate::error::{DataplaneError, Result};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;

pub trait ChatTemplate: Send + Sync {
    fn render(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// `role: content` per line, ending with an open assistant turn.
pub struct RolePrefixTemplate;

impl ChatTemplate for RolePrefixTemplate {
    fn render(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str(&message.role);
            prompt.push_str(": ");
            prompt.push_str(message.content.as_deref().unwrap_or_default());
            prompt.push('\n');
        }
        prompt.push_str("assistant:");
        Ok(prompt)
    }
}

#[derive(Clone)]
pub struct ChatAdapter {
    template: Arc<dyn ChatTemplate>,
}

impl ChatAdapter {
    pub fn new(template: Arc<dyn ChatTemplate>) -> Self {
        Self { template }
    }

    pub fn to_completion_request(&self, request: ChatCompletionRequest) -> Result<CompletionRequest> {
        if request.messages.is_empty() {
            return Err(DataplaneError::invalid_input("messages must not be empty"));
        }
        let prompt = self.template.render(&request.messages)?;
        Ok(CompletionRequest {
            model: request.model,
            prompt: Prompt::Text(prompt),
            max_tokens: request.max_tokens,
            n: request.n,
            best_of: None,
            echo: None,
            logprobs: None,
            stream: request.stream,
            temperature: request.temperature,
            top_p: request.top_p,
            user: request.user,
            extra: request.extra,
        })
    }

    pub fn adapt(&self, output: CompletionOutput) -> ChatOutput {
        match output {
            OpenAIOutput::Full(completion) => OpenAIOutput::Full(completion_to_chat(completion)),
            OpenAIOutput::Stream(chunks) => {
                let mut seen = HashSet::new();
                OpenAIOutput::Stream(
                    chunks
                        .map(move |chunk| chunk.map(|c| chunk_to_chat(c, &mut seen)))
                        .boxed(),
                )
            }
        }
    }
}

pub fn completion_to_chat(completion: Completion) -> ChatCompletion {
    ChatCompletion {
        id: completion.id,
        object: "chat.completion".to_string(),
        created: completion.created,
        model: completion.model,
        choices: completion
            .choices
            .into_iter()
            .map(|choice| ChatChoice {
                index: choice.index,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(choice.text),
                    name: None,
                },
                logprobs: choice.logprobs,
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: completion.usage,
    }
}

/// The first chunk seen for each choice index carries the assistant role.
fn chunk_to_chat(chunk: Completion, seen: &mut HashSet<u32>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: chunk.id,
        object: "chat.completion.chunk".to_string(),
        created: chunk.created,
        model: chunk.model,
        choices: chunk
            .choices
            .into_iter()
            .map(|choice| ChatChunkChoice {
                index: choice.index,
                delta: ChatDelta {
                    role: seen.insert(choice.index).then(|| "assistant".to_string()),
                    content: (!choice.text.is_empty()).then_some(choice.text),
                },
                logprobs: choice.logprobs,
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: chunk.usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::types::{CompletionChoice, Usage};
    use futures::stream;
    use serde_json::Map;

    fn completion(index: u32, text: &str, finish: Option<&str>, usage: Option<Usage>) -> Completion {
        Completion {
            id: "cmpl-1".into(),
            object: "text_completion".into(),
            created: 10,
            model: "m".into(),
            choices: vec![CompletionChoice {
                index,
                text: text.into(),
                logprobs: None,
                finish_reason: finish.map(str::to_string),
            }],
            usage,
        }
    }

    #[test]
    fn test_template_render() {
        let prompt = RolePrefixTemplate
            .render(&[
                ChatMessage { role: "system".into(), content: Some("be brief".into()), name: None },
                ChatMessage { role: "user".into(), content: Some("hi".into()), name: None },
            ])
            .unwrap();
        assert_eq!(prompt, "system: be brief\nuser: hi\nassistant:");
    }

    #[test]
    fn test_full_mapping_is_one_to_one() {
        let usage = Some(Usage::new(3, 2));
        let chat = completion_to_chat(completion(0, "hello", Some("stop"), usage));
        assert_eq!(chat.id, "cmpl-1");
        assert_eq!(chat.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(chat.choices[0].message.role, "assistant");
        assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chat.usage, usage);
    }

    #[tokio::test]
    async fn test_stream_role_on_first_chunk_per_index() {
        let adapter = ChatAdapter::new(Arc::new(RolePrefixTemplate));
        let chunks = stream::iter(vec![
            Ok(completion(0, "a", None, None)),
            Ok(completion(1, "x", None, None)),
            Ok(completion(0, "b", None, None)),
            Ok(completion(0, "", Some("stop"), Some(Usage::new(1, 2)))),
        ])
        .boxed();
        let out = match adapter.adapt(OpenAIOutput::Stream(chunks)) {
            OpenAIOutput::Stream(s) => s.map(|c| c.unwrap()).collect::<Vec<_>>().await,
            OpenAIOutput::Full(_) => panic!("expected stream"),
        };
        let roles: Vec<Option<&str>> = out.iter().map(|c| c.choices[0].delta.role.as_deref()).collect();
        assert_eq!(roles, vec![Some("assistant"), Some("assistant"), None, None]);
        assert_eq!(out[3].choices[0].delta.content, None);
        assert_eq!(out[3].usage, Some(Usage::new(1, 2)));
    }

    #[test]
    fn test_request_conversion() {
        let adapter = ChatAdapter::new(Arc::new(RolePrefixTemplate));
        let request = ChatCompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage { role: "user".into(), content: Some("q".into()), name: None }],
            max_tokens: Some(4),
            n: None,
            logprobs: None,
            stream: Some(true),
            temperature: None,
            top_p: None,
            user: None,
            extra: Map::new(),
        };
        let converted = adapter.to_completion_request(request).unwrap();
        assert_eq!(converted.prompt, Prompt::Text("user: q\nassistant:".into()));
        assert_eq!(converted.max_tokens, Some(4));
        assert!(converted.is_stream());
    }
}
