//! Adapter for the Google Generative Language API.
//!
//! Gemini does not speak the OpenAI wire format: system messages become a
//! `systemInstruction`, assistant turns use role `model`, and streaming goes
//! through `:streamGenerateContent?alt=sse`. The non-streaming path uses the
//! trait's default chunk assembly so the gateway surface stays OpenAI-shaped.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{
    sse::{decode_sse_body, SseData},
    AdapterError, AdapterResult, ChatAdapter, ChunkStream,
};
use crate::protocols::chat::{ChatMessage, GenerationOptions, Role, StringOrArray};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 2048;

#[derive(Debug)]
pub struct GeminiAdapter {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: "gemini-2.0-flash".to_string(),
            client,
        }
    }

    fn payload(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Value {
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for message in messages {
            let text = message.content.flattened_text();
            match message.role {
                Role::System => system_parts.push(json!({"text": text})),
                Role::User => contents.push(json!({"role": "user", "parts": [{"text": text}]})),
                Role::Assistant => {
                    contents.push(json!({"role": "model", "parts": [{"text": text}]}))
                }
            }
        }

        let mut body = Map::new();
        body.insert("contents".to_string(), json!(contents));
        if !system_parts.is_empty() {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": system_parts}),
            );
        }

        let mut generation = Map::new();
        if let Some(v) = options.temperature {
            generation.insert("temperature".to_string(), json!(v));
        }
        if let Some(v) = options.top_p {
            generation.insert("topP".to_string(), json!(v));
        }
        if let Some(v) = options.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(v));
        }
        if let Some(v) = &options.stop {
            let stops = match v {
                StringOrArray::String(s) => vec![s.clone()],
                StringOrArray::Array(a) => a.clone(),
            };
            generation.insert("stopSequences".to_string(), json!(stops));
        }
        if !generation.is_empty() {
            body.insert("generationConfig".to_string(), Value::Object(generation));
        }

        Value::Object(body)
    }
}

/// Extract text from one `streamGenerateContent` SSE frame.
fn parse_stream_data(data: &str) -> AdapterResult<SseData> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| AdapterError::Payload(format!("bad stream frame: {e}")))?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error frame");
        return Err(AdapterError::Payload(message.to_string()));
    }
    let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() else {
        return Ok(SseData::Skip);
    };
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        Ok(SseData::Skip)
    } else {
        Ok(SseData::Text(text))
    }
}

#[async_trait]
impl ChatAdapter for GeminiAdapter {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> AdapterResult<ChunkStream> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        tracing::debug!(provider = "gemini", model, "opening streaming call");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.payload(messages, options))
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
        Ok(decode_sse_body(response, parse_stream_data))
    }
}
