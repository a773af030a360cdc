//! Adapter for OpenAI-compatible chat completion APIs.
//!
//! Groq, OpenRouter and Cerebras all speak the OpenAI wire format, so one
//! adapter covers the three, parameterized by base URL and default model.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{
    sse::{decode_sse_body, SseData},
    AdapterError, AdapterResult, ChatAdapter, ChunkStream,
};
use crate::protocols::chat::{ChatMessage, GenerationOptions, StringOrArray};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How much of an upstream error body is kept for the error message.
const ERROR_BODY_LIMIT: usize = 2048;

#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    label: &'static str,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(label: &'static str, base_url: &str, api_key: String, default_model: &str) -> Self {
        // No total request timeout: it would cut long streams short. The
        // routing core owns the first-token deadline.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            label,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.to_string(),
            client,
        }
    }

    pub fn groq(api_key: String) -> Self {
        Self::new(
            "groq",
            "https://api.groq.com/openai/v1",
            api_key,
            "llama-3.3-70b-versatile",
        )
    }

    pub fn openrouter(api_key: String) -> Self {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            api_key,
            "openrouter/auto",
        )
    }

    pub fn cerebras(api_key: String) -> Self {
        Self::new(
            "cerebras",
            "https://api.cerebras.ai/v1",
            api_key,
            "llama-3.3-70b",
        )
    }

    fn payload(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> Value {
        let mut body = Map::new();
        body.insert(
            "model".to_string(),
            json!(options.model.as_deref().unwrap_or(&self.default_model)),
        );
        body.insert("messages".to_string(), json!(messages));
        body.insert("stream".to_string(), json!(stream));
        if let Some(v) = options.temperature {
            body.insert("temperature".to_string(), json!(v));
        }
        if let Some(v) = options.top_p {
            body.insert("top_p".to_string(), json!(v));
        }
        if let Some(v) = options.max_tokens {
            body.insert("max_tokens".to_string(), json!(v));
        }
        if let Some(v) = options.presence_penalty {
            body.insert("presence_penalty".to_string(), json!(v));
        }
        if let Some(v) = options.frequency_penalty {
            body.insert("frequency_penalty".to_string(), json!(v));
        }
        if let Some(v) = &options.stop {
            let stop = match v {
                StringOrArray::String(s) => json!(s),
                StringOrArray::Array(a) => json!(a),
            };
            body.insert("stop".to_string(), stop);
        }
        if let Some(v) = &options.tools {
            body.insert("tools".to_string(), json!(v));
        }
        if let Some(v) = &options.tool_choice {
            body.insert("tool_choice".to_string(), v.clone());
        }
        Value::Object(body)
    }

    async fn dispatch(&self, payload: &Value) -> AdapterResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(ERROR_BODY_LIMIT);
            return Err(AdapterError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

/// Extract the content delta from one OpenAI-format stream frame.
fn parse_stream_data(data: &str) -> AdapterResult<SseData> {
    if data == "[DONE]" {
        return Ok(SseData::Done);
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| AdapterError::Payload(format!("bad stream frame: {e}")))?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error frame");
        return Err(AdapterError::Payload(message.to_string()));
    }
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) => Ok(SseData::Text(text.to_string())),
        None => Ok(SseData::Skip),
    }
}

#[async_trait]
impl ChatAdapter for OpenAiCompatAdapter {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> AdapterResult<ChunkStream> {
        tracing::debug!(provider = self.label, "opening streaming call");
        let response = self.dispatch(&self.payload(messages, options, true)).await?;
        Ok(decode_sse_body(response, parse_stream_data))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> AdapterResult<Value> {
        let response = self
            .dispatch(&self.payload(messages, options, false))
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| AdapterError::Payload(format!("bad completion body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::chat::{MessageContent, Role};

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::groq("key".to_string())
    }

    #[test]
    fn test_payload_defaults_model() {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: MessageContent::Text("hi".to_string()),
        }];
        let payload = adapter().payload(&messages, &GenerationOptions::default(), true);
        assert_eq!(payload["model"], "llama-3.3-70b-versatile");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["messages"][0]["role"], "user");
        assert!(payload.get("temperature").is_none());
    }

    #[test]
    fn test_payload_passes_options_through() {
        let options = GenerationOptions {
            model: Some("mixtral".to_string()),
            temperature: Some(0.7),
            max_tokens: Some(100),
            stop: Some(StringOrArray::Array(vec!["END".to_string()])),
            ..Default::default()
        };
        let payload = adapter().payload(&[], &options, false);
        assert_eq!(payload["model"], "mixtral");
        assert_eq!(payload["temperature"], 0.7);
        assert_eq!(payload["max_tokens"], 100);
        assert_eq!(payload["stop"][0], "END");
        assert_eq!(payload["stream"], false);
    }

    #[test]
    fn test_parse_stream_data_variants() {
        assert!(matches!(parse_stream_data("[DONE]"), Ok(SseData::Done)));

        let delta = r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#;
        match parse_stream_data(delta) {
            Ok(SseData::Text(t)) => assert_eq!(t, "Hel"),
            other => panic!("unexpected: {:?}", other.map(|_| ()).err()),
        }

        let role_only = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert!(matches!(parse_stream_data(role_only), Ok(SseData::Skip)));

        assert!(parse_stream_data("not json").is_err());

        let error_frame = r#"{"error":{"message":"rate limited"}}"#;
        match parse_stream_data(error_frame) {
            Err(AdapterError::Payload(m)) => assert_eq!(m, "rate limited"),
            other => panic!("unexpected: {:?}", other.map(|_| ()).err()),
        }
    }
}
