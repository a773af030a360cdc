//! SSE event frames emitted to streaming clients.

use serde_json::json;

use crate::core::circuit_breaker::CircuitState;

/// Terminal sentinel of every SSE stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

fn sse_frame(value: serde_json::Value) -> String {
    format!("data: {}\n\n", value)
}

/// Metadata emitted once, just before the first content chunk, naming the
/// upstream the request committed to.
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub provider: String,
    pub latency_ms: u64,
    pub circuit: CircuitState,
    /// Health score scaled to 0..100
    pub health_score: u8,
    pub request_id: String,
}

impl StreamMetadata {
    pub fn frame(&self) -> String {
        sse_frame(json!({
            "type": "nexus-metadata",
            "metadata": {
                "provider": self.provider,
                "latency": self.latency_ms,
                "circuit": self.circuit.as_str(),
                "healthScore": self.health_score,
                "requestId": self.request_id,
            }
        }))
    }
}

/// One `chat.completion.chunk` frame carrying a content delta.
pub fn chunk_frame(id: &str, created: u64, model: &str, content: &str) -> String {
    sse_frame(json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "delta": {"content": content},
            "index": 0,
            "finish_reason": null
        }]
    }))
}

/// Error frame emitted when no upstream produced any chunk.
pub fn error_frame(message: &str) -> String {
    sse_frame(json!({
        "error": {"message": message, "type": "gateway_error"}
    }))
}
