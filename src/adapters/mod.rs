//! Upstream adapters.
//!
//! An adapter turns a validated message list into a lazy stream of text
//! chunks from one remote chat service. The routing core sees upstreams only
//! through the [`ChatAdapter`] capability; everything provider-specific
//! (endpoints, auth, wire format) lives behind it.

pub mod gemini;
pub mod openai_compat;
pub mod sse;

use std::{fmt, pin::Pin};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::protocols::chat::{assemble_completion, unix_timestamp, ChatMessage, GenerationOptions};

pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiCompatAdapter;

/// Adapter-level errors, recorded verbatim on upstream metrics.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("upstream returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed upstream payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Network(err.to_string())
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// A finite, non-restartable stream of non-empty text chunks.
///
/// Dropping the stream releases the underlying connection; a new call to
/// [`ChatAdapter::stream`] constructs a new stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = AdapterResult<String>> + Send>>;

/// Streaming capability of one remote chat service.
#[async_trait]
pub trait ChatAdapter: Send + Sync + fmt::Debug {
    /// Model used when the request does not carry an override.
    fn default_model(&self) -> &str;

    /// Open a streaming call. The returned stream ends normally when the
    /// upstream completes, or yields an error item on failure.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> AdapterResult<ChunkStream>;

    /// Non-streaming call, returning the upstream's final payload.
    ///
    /// The default implementation drains [`stream`](ChatAdapter::stream) and
    /// assembles an OpenAI-shaped completion from the concatenated chunks;
    /// adapters with a native non-streaming endpoint override it.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> AdapterResult<Value> {
        let mut stream = self.stream(messages, options).await?;
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            content.push_str(&chunk?);
        }
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model().to_string());
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        Ok(assemble_completion(&id, unix_timestamp(), &model, &content))
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::NullAdapter, *};
    use crate::protocols::chat::{MessageContent, Role};

    #[derive(Debug)]
    struct ScriptedAdapter {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl ChatAdapter for ScriptedAdapter {
        fn default_model(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> AdapterResult<ChunkStream> {
            let chunks: Vec<AdapterResult<String>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    fn user_message(text: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn test_default_complete_assembles_chunks() {
        let adapter = ScriptedAdapter {
            chunks: vec!["Hel", "lo"],
        };
        let value = adapter
            .complete(&[user_message("hi")], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "Hello");
        assert_eq!(value["model"], "scripted");
    }

    #[tokio::test]
    async fn test_default_complete_honors_model_override() {
        let adapter = ScriptedAdapter { chunks: vec!["x"] };
        let options = GenerationOptions {
            model: Some("custom".to_string()),
            ..Default::default()
        };
        let value = adapter
            .complete(&[user_message("hi")], &options)
            .await
            .unwrap();
        assert_eq!(value["model"], "custom");
    }

    #[tokio::test]
    async fn test_null_adapter_yields_nothing() {
        let adapter = NullAdapter::new("m");
        let mut stream = adapter
            .stream(&[user_message("hi")], &GenerationOptions::default())
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
    }
}
