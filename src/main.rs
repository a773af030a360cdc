use std::sync::Arc;

use tracing::{info, warn, Level};

use nexus_gateway::{
    adapters::{ChatAdapter, GeminiAdapter, OpenAiCompatAdapter},
    app_context::AppContext,
    config::{discover_upstreams, GatewayConfig},
    core::upstream::{ProviderKind, TrackedUpstream, UpstreamId, UpstreamPool},
    observability::logging::{init_logging, LoggingConfig},
    server,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env();

    init_logging(LoggingConfig {
        level: Level::INFO,
        json_format: std::env::var("NEXUS_LOG_JSON").is_ok(),
        colorize: true,
    });

    let keys = discover_upstreams();
    if keys.is_empty() {
        warn!("no upstream API keys found in environment (expected <PROVIDER>_KEY_<N>)");
    }

    let upstreams: Vec<Arc<TrackedUpstream>> = keys
        .into_iter()
        .map(|key| {
            let adapter: Arc<dyn ChatAdapter> = match key.kind {
                ProviderKind::Groq => Arc::new(OpenAiCompatAdapter::groq(key.api_key)),
                ProviderKind::Openrouter => Arc::new(OpenAiCompatAdapter::openrouter(key.api_key)),
                ProviderKind::Cerebras => Arc::new(OpenAiCompatAdapter::cerebras(key.api_key)),
                ProviderKind::Gemini => Arc::new(GeminiAdapter::new(key.api_key)),
            };
            let id = UpstreamId::new(key.kind, key.instance);
            info!(upstream = %id, "registered upstream");
            Arc::new(TrackedUpstream::new(
                id,
                adapter,
                config.circuit_breaker.clone(),
                config.priorities.bonus(key.kind),
            ))
        })
        .collect();

    let context = AppContext::new(config, UpstreamPool::new(upstreams));
    server::startup(context).await
}
