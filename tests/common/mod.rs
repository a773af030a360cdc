//! Shared test fixtures: scripted mock adapters and engine builders.

use std::{collections::VecDeque, sync::Arc, sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;

use nexus_gateway::{
    adapters::{AdapterError, AdapterResult, ChatAdapter, ChunkStream},
    config::{BackoffConfig, CircuitBreakerConfig, FailoverConfig},
    core::upstream::{ProviderKind, TrackedUpstream, UpstreamId, UpstreamPool},
    policies::{PolicyRegistry, RoutingMode},
    protocols::chat::{ChatMessage, GenerationOptions, MessageContent, Role},
    routers::failover::{ChatRequestContext, FailoverEngine},
};

/// One scripted behavior of a mock upstream for a single `stream()` call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Yield these chunks, then end normally
    Chunks(Vec<&'static str>),
    /// Yield these chunks, then fail mid-stream
    ChunksThenError(Vec<&'static str>, &'static str),
    /// Fail before producing any chunk
    FailImmediately(&'static str),
    /// Accept the call but never produce a token
    Hang,
    /// Yield the first chunk, then the second after a delay
    SlowSecondChunk(&'static str, Duration, &'static str),
    /// End normally without producing any chunk
    EmptyBody,
}

/// Adapter that replays a queue of scripts, one per `stream()` call.
/// When the queue runs dry the last script repeats.
#[derive(Debug)]
pub struct MockAdapter {
    model: String,
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
}

impl MockAdapter {
    pub fn new(script: Script) -> Self {
        Self {
            model: "mock-model".to_string(),
            scripts: Mutex::new(VecDeque::new()),
            fallback: script,
        }
    }

    pub fn with_sequence(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            model: "mock-model".to_string(),
            scripts: Mutex::new(scripts.into()),
            fallback,
        }
    }

    fn next_script(&self) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ChatAdapter for MockAdapter {
    fn default_model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> AdapterResult<ChunkStream> {
        match self.next_script() {
            Script::Chunks(chunks) => {
                let items: Vec<AdapterResult<String>> =
                    chunks.iter().map(|c| Ok(c.to_string())).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Script::ChunksThenError(chunks, message) => {
                let mut items: Vec<AdapterResult<String>> =
                    chunks.iter().map(|c| Ok(c.to_string())).collect();
                items.push(Err(AdapterError::Network(message.to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::FailImmediately(message) => Err(AdapterError::Http {
                status: 500,
                message: message.to_string(),
            }),
            Script::Hang => Ok(Box::pin(stream::pending::<AdapterResult<String>>())),
            Script::SlowSecondChunk(first, delay, second) => {
                let head: Vec<AdapterResult<String>> = vec![Ok(first.to_string())];
                let tail = stream::once(tokio::time::sleep(delay)).map(move |_| {
                    let item: AdapterResult<String> = Ok(second.to_string());
                    item
                });
                Ok(Box::pin(stream::iter(head).chain(tail)))
            }
            Script::EmptyBody => Ok(Box::pin(stream::empty::<AdapterResult<String>>())),
        }
    }
}

pub fn upstream(
    kind: ProviderKind,
    instance: u32,
    bonus: f64,
    adapter: MockAdapter,
) -> Arc<TrackedUpstream> {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout_ms: 60_000,
        half_open_max_attempts: 1,
    };
    Arc::new(TrackedUpstream::new(
        UpstreamId::new(kind, instance),
        Arc::new(adapter),
        breaker,
        bonus,
    ))
}

pub fn engine(upstreams: Vec<Arc<TrackedUpstream>>) -> FailoverEngine {
    FailoverEngine::new(
        Arc::new(UpstreamPool::new(upstreams)),
        Arc::new(PolicyRegistry::new()),
        FailoverConfig::default(),
        BackoffConfig::default(),
    )
}

pub fn user_message(text: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: MessageContent::Text(text.to_string()),
    }
}

pub fn request_context(mode: RoutingMode) -> ChatRequestContext {
    ChatRequestContext {
        request_id: "chatcmpl-test".to_string(),
        created: 1_700_000_000,
        messages: vec![user_message("hi")],
        options: GenerationOptions::default(),
        routing_mode: mode,
    }
}

/// Run one streaming request to completion and collect the emitted frames.
pub async fn run_streaming(engine: &FailoverEngine, mode: RoutingMode) -> Vec<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    engine.stream_chat(request_context(mode), tx).await;

    let mut frames = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        frames.push(String::from_utf8(bytes.to_vec()).expect("frames are UTF-8"));
    }
    frames
}

/// Parse the JSON payload of one `data:` frame.
pub fn frame_json(frame: &str) -> serde_json::Value {
    let data = frame
        .strip_prefix("data: ")
        .and_then(|s| s.strip_suffix("\n\n"))
        .expect("well-formed SSE frame");
    serde_json::from_str(data).expect("frame payload is JSON")
}

pub fn is_metadata(frame: &str) -> bool {
    frame.contains("nexus-metadata")
}

/// Content delta of a chunk frame; `None` for metadata, error and sentinel
/// frames.
pub fn chunk_content(frame: &str) -> Option<String> {
    let data = frame.strip_prefix("data: ")?.strip_suffix("\n\n")?;
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(String::from)
}
