//! Server-sent-event framing for streamed OpenAI responses.

use super::types::ErrorResponse;
use crate::error::Result;
use futures::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::warn;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub fn frame<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => error_frame(&ErrorResponse::new(500, format!("failed to encode chunk: {}", e), "InternalServerError")),
    }
}

pub fn error_frame(error: &ErrorResponse) -> String {
    format!(
        "data: {}\n\n",
        serde_json::to_string(error).unwrap_or_else(|_| r#"{"error":{"code":"500","message":"internal error","type":"InternalServerError","param":null}}"#.to_string())
    )
}

struct ActiveStream;

impl ActiveStream {
    fn start() -> Self {
        crate::metrics::inc_streams();
        Self
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        crate::metrics::dec_streams();
    }
}

/// Frames each chunk as `data: <json>\n\n`. A failed chunk ends the stream
/// with one error frame. The sequence always ends with exactly one
/// `data: [DONE]\n\n`.
pub fn into_frames<C>(chunks: BoxStream<'static, Result<C>>) -> impl Stream<Item = String> + Send + 'static
where
    C: Serialize + Send + 'static,
{
    async_stream::stream! {
        let _active = ActiveStream::start();
        let mut chunks = chunks;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => yield frame(&chunk),
                Err(e) => {
                    warn!("Stream failed mid-response: {}", e);
                    yield error_frame(&ErrorResponse::from(&e));
                    break;
                }
            }
        }
        yield DONE_FRAME.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataplaneError;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_end_with_single_done() {
        let chunks: BoxStream<'static, Result<serde_json::Value>> =
            stream::iter(vec![Ok(json!({"a": 1})), Ok(json!({"a": 2}))]).boxed();
        let frames: Vec<String> = into_frames(chunks).collect().await;
        assert_eq!(
            frames,
            vec![
                "data: {\"a\":1}\n\n".to_string(),
                "data: {\"a\":2}\n\n".to_string(),
                DONE_FRAME.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_mid_stream() {
        let chunks: BoxStream<'static, Result<serde_json::Value>> = stream::iter(vec![
            Ok(json!({"a": 1})),
            Err(DataplaneError::Internal("generator crashed".into())),
            Ok(json!({"a": 3})),
        ])
        .boxed();
        let frames: Vec<String> = into_frames(chunks).collect().await;
        assert_eq!(frames.len(), 3);
        assert!(frames[1].contains("generator crashed"));
        assert_eq!(frames.iter().filter(|f| f.as_str() == DONE_FRAME).count(), 1);
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
    }

    #[tokio::test]
    async fn test_empty_stream_still_done() {
        let chunks: BoxStream<'static, Result<serde_json::Value>> = stream::iter(Vec::new()).boxed();
        let frames: Vec<String> = into_frames(chunks).collect().await;
        assert_eq!(frames, vec![DONE_FRAME.to_string()]);
    }
}
