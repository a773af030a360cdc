//! Observability: logging initialization.

pub mod logging;
