//! Shared application state.

use std::sync::Arc;

use tokio::time::Instant;

use crate::{
    config::GatewayConfig,
    core::upstream::UpstreamPool,
    lifecycle::LifecycleController,
    policies::PolicyRegistry,
    routers::failover::FailoverEngine,
};

/// Everything the HTTP handlers need, built once at startup.
#[derive(Debug)]
pub struct AppContext {
    pub config: GatewayConfig,
    pub pool: Arc<UpstreamPool>,
    pub engine: Arc<FailoverEngine>,
    pub lifecycle: Arc<LifecycleController>,
    pub start_time: Instant,
}

impl AppContext {
    pub fn new(config: GatewayConfig, pool: UpstreamPool) -> Arc<Self> {
        let pool = Arc::new(pool);
        let engine = Arc::new(FailoverEngine::new(
            Arc::clone(&pool),
            Arc::new(PolicyRegistry::new()),
            config.failover.clone(),
            config.backoff.clone(),
        ));
        Arc::new(Self {
            config,
            pool,
            engine,
            lifecycle: LifecycleController::new(),
            start_time: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
