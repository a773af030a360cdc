//! Wire types: OpenAI-compatible chat requests and SSE event frames.

pub mod chat;
pub mod events;
