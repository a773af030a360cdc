//! Request routing: the failover engine and the chat endpoint semantics.

pub mod chat;
pub mod failover;

pub use failover::{ChatRequestContext, FailoverEngine};
