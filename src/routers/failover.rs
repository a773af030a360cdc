//! Per-request failover loop.
//!
//! Each request runs this loop sequentially: select an upstream, dispatch,
//! and either commit to its stream or record the failure and advance to the
//! next candidate. The first-token deadline defines the failover window:
//! once any chunk has been forwarded to the client the commitment is
//! irrevocable, because two upstream streams cannot be spliced coherently.

use std::{collections::HashSet, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    adapters::ChunkStream,
    config::{BackoffConfig, FailoverConfig},
    core::{
        backoff::BackoffCalculator,
        error::{GatewayError, GatewayResult},
        health,
        upstream::{TrackedUpstream, UpstreamPool},
    },
    policies::{PolicyRegistry, RoutingMode},
    protocols::{
        chat::{ChatMessage, GenerationOptions},
        events::{chunk_frame, error_frame, StreamMetadata, DONE_FRAME},
    },
};

/// Inputs of one chat request, already validated.
#[derive(Debug)]
pub struct ChatRequestContext {
    pub request_id: String,
    pub created: u64,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    pub routing_mode: RoutingMode,
}

/// The routing and resilience engine shared by all requests.
#[derive(Debug)]
pub struct FailoverEngine {
    pool: Arc<UpstreamPool>,
    policies: Arc<PolicyRegistry>,
    failover: FailoverConfig,
    backoff: BackoffConfig,
}

/// Classifies one attempt exactly once.
///
/// `begin` counts the attempt; `succeed`/`fail` classify it and feed the
/// breaker. If neither runs because the request future was dropped
/// mid-attempt, `Drop` books the attempt as a cancellation failure without
/// touching the breaker, since a client hangup says nothing about upstream
/// health.
struct AttemptGuard {
    upstream: Arc<TrackedUpstream>,
    start: Instant,
    classified: bool,
}

impl AttemptGuard {
    fn begin(upstream: Arc<TrackedUpstream>) -> Self {
        upstream.metrics().record_attempt_start();
        Self {
            upstream,
            start: Instant::now(),
            classified: false,
        }
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn succeed(mut self) {
        self.classified = true;
        self.upstream.metrics().record_success(self.start.elapsed());
        self.upstream.breaker().record_success();
    }

    fn fail(mut self, message: &str) {
        self.classified = true;
        self.upstream
            .metrics()
            .record_failure(self.start.elapsed(), message);
        self.upstream.breaker().record_failure();
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.classified {
            self.upstream
                .metrics()
                .record_failure(self.start.elapsed(), "cancelled");
        }
    }
}

/// Outcome of awaiting an upstream's first chunk under the deadline.
enum FirstChunk {
    /// A non-empty chunk arrived; the stream continues after it
    Arrived(ChunkStream, String),
    /// The stream ended cleanly before producing any chunk
    EmptyBody,
    /// The adapter failed before any chunk
    Failed(String),
    /// The first-token deadline elapsed
    TimedOut,
}

impl FailoverEngine {
    pub fn new(
        pool: Arc<UpstreamPool>,
        policies: Arc<PolicyRegistry>,
        failover: FailoverConfig,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            pool,
            policies,
            failover,
            backoff,
        }
    }

    fn select(
        &self,
        tried: &HashSet<usize>,
        mode: RoutingMode,
    ) -> Option<(usize, Arc<TrackedUpstream>)> {
        let idx = self.policies.get(mode).select(self.pool.all(), tried)?;
        let upstream = Arc::clone(self.pool.get(idx)?);
        Some((idx, upstream))
    }

    /// Select the next candidate, applying the backoff-and-reprobe rule when
    /// the first pass comes up empty.
    async fn next_candidate(
        &self,
        tried: &HashSet<usize>,
        mode: RoutingMode,
        attempt_number: u32,
    ) -> Option<(usize, Arc<TrackedUpstream>)> {
        if let Some(found) = self.select(tried, mode) {
            return Some(found);
        }
        if attempt_number == 0 {
            return None;
        }
        // Everything available has been tried; back off once and re-probe in
        // case a breaker's reset timeout has elapsed meanwhile.
        let delay = BackoffCalculator::delay(&self.backoff, attempt_number);
        tokio::time::sleep(delay).await;
        self.select(tried, mode)
    }

    /// Await the adapter's first non-empty chunk under the first-token
    /// deadline. Opening the stream counts against the same budget: a hung
    /// connect and a hung first token are the same failure from the client's
    /// side.
    async fn await_first_chunk(
        &self,
        upstream: &Arc<TrackedUpstream>,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> FirstChunk {
        let open_and_first = async {
            let mut stream = match upstream.adapter().stream(messages, options).await {
                Ok(stream) => stream,
                Err(err) => return FirstChunk::Failed(err.to_string()),
            };
            loop {
                match stream.next().await {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(Ok(chunk)) => return FirstChunk::Arrived(stream, chunk),
                    Some(Err(err)) => return FirstChunk::Failed(err.to_string()),
                    None => return FirstChunk::EmptyBody,
                }
            }
        };

        match tokio::time::timeout(self.failover.first_token_timeout(), open_and_first).await {
            Ok(outcome) => outcome,
            Err(_) => FirstChunk::TimedOut,
        }
    }

    /// Run one streaming chat request, writing SSE frames into `tx`.
    ///
    /// A failed send means the client went away: the current adapter stream
    /// is dropped (releasing its connection) and the loop stops without
    /// recording a success.
    pub async fn stream_chat(&self, ctx: ChatRequestContext, tx: mpsc::UnboundedSender<Bytes>) {
        let mut tried: HashSet<usize> = HashSet::new();
        let mut attempt_number: u32 = 0;
        let mut started = false;
        let mut committed = false;
        let mut last_error: Option<String> = None;

        'failover: loop {
            if tx.is_closed() {
                debug!(request_id = %ctx.request_id, "client disconnected before commit");
                return;
            }

            let Some((idx, upstream)) =
                self.next_candidate(&tried, ctx.routing_mode, attempt_number).await
            else {
                break 'failover;
            };

            attempt_number += 1;
            tried.insert(idx);
            if attempt_number > 1 {
                let delay = BackoffCalculator::delay(&self.backoff, attempt_number - 1);
                debug!(
                    request_id = %ctx.request_id,
                    attempt = attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    "failover backoff"
                );
                tokio::time::sleep(delay).await;
            }

            // Count a HALF_OPEN probe before the call so the cap holds even
            // while the call blocks.
            upstream.breaker().note_dispatch();
            let attempt = AttemptGuard::begin(Arc::clone(&upstream));
            debug!(
                request_id = %ctx.request_id,
                upstream = %upstream.name(),
                attempt = attempt_number,
                mode = ctx.routing_mode.as_str(),
                "dispatching attempt"
            );

            match self
                .await_first_chunk(&upstream, &ctx.messages, &ctx.options)
                .await
            {
                FirstChunk::TimedOut => {
                    warn!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.name(),
                        "first-token deadline elapsed"
                    );
                    last_error = Some(format!(
                        "{}: no token within {}ms",
                        upstream.name(),
                        self.failover.first_token_timeout_ms
                    ));
                    attempt.fail("first token timeout");
                    continue 'failover;
                }
                FirstChunk::Failed(message) => {
                    warn!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.name(),
                        error = %message,
                        "attempt failed before first chunk"
                    );
                    last_error = Some(format!("{}: {}", upstream.name(), message));
                    attempt.fail(&message);
                    continue 'failover;
                }
                FirstChunk::EmptyBody => {
                    // Rare: upstream completed with no content. The request
                    // committed to an empty body; nothing to fail over to.
                    info!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.name(),
                        "upstream completed with empty body"
                    );
                    attempt.succeed();
                    committed = true;
                    break 'failover;
                }
                FirstChunk::Arrived(mut stream, first) => {
                    started = true;
                    let model = ctx
                        .options
                        .model
                        .clone()
                        .unwrap_or_else(|| upstream.adapter().default_model().to_string());
                    let metadata = StreamMetadata {
                        provider: upstream.name(),
                        latency_ms: attempt.elapsed().as_millis() as u64,
                        circuit: upstream.breaker().state(),
                        health_score: (health::score_upstream(&upstream, Instant::now()) * 100.0)
                            .round() as u8,
                        request_id: ctx.request_id.clone(),
                    };
                    info!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.name(),
                        latency_ms = metadata.latency_ms,
                        "committed to upstream"
                    );

                    if !send(&tx, metadata.frame())
                        || !send(&tx, chunk_frame(&ctx.request_id, ctx.created, &model, &first))
                    {
                        return;
                    }

                    loop {
                        match stream.next().await {
                            Some(Ok(chunk)) if chunk.is_empty() => continue,
                            Some(Ok(chunk)) => {
                                if !send(
                                    &tx,
                                    chunk_frame(&ctx.request_id, ctx.created, &model, &chunk),
                                ) {
                                    return;
                                }
                            }
                            Some(Err(err)) => {
                                // Committed-stream error: the client already
                                // holds part of this response, so no other
                                // upstream can continue it. Terminate.
                                warn!(
                                    request_id = %ctx.request_id,
                                    upstream = %upstream.name(),
                                    error = %err,
                                    "stream failed after commit"
                                );
                                attempt.fail(&err.to_string());
                                break 'failover;
                            }
                            None => {
                                attempt.succeed();
                                committed = true;
                                break 'failover;
                            }
                        }
                    }
                }
            }
        }

        if !started && !committed {
            let message =
                last_error.unwrap_or_else(|| "no upstreams available".to_string());
            let _ = send(&tx, error_frame(&message));
        }
        let _ = send(&tx, DONE_FRAME.to_string());
    }

    /// Run one non-streaming chat request. The failover iteration and
    /// backoff match the streaming path; there is no first-token deadline
    /// because nothing has been committed until the whole payload is in hand.
    pub async fn complete_chat(&self, ctx: ChatRequestContext) -> GatewayResult<Value> {
        let mut tried: HashSet<usize> = HashSet::new();
        let mut attempt_number: u32 = 0;
        let mut last_error: Option<String> = None;

        loop {
            let Some((idx, upstream)) =
                self.next_candidate(&tried, ctx.routing_mode, attempt_number).await
            else {
                return Err(GatewayError::Exhausted(
                    last_error.unwrap_or_else(|| "no upstreams available".to_string()),
                ));
            };

            attempt_number += 1;
            tried.insert(idx);
            if attempt_number > 1 {
                tokio::time::sleep(BackoffCalculator::delay(&self.backoff, attempt_number - 1))
                    .await;
            }

            upstream.breaker().note_dispatch();
            let attempt = AttemptGuard::begin(Arc::clone(&upstream));
            debug!(
                request_id = %ctx.request_id,
                upstream = %upstream.name(),
                attempt = attempt_number,
                "dispatching non-streaming attempt"
            );

            match upstream
                .adapter()
                .complete(&ctx.messages, &ctx.options)
                .await
            {
                Ok(payload) => {
                    attempt.succeed();
                    return Ok(payload);
                }
                Err(err) => {
                    warn!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.name(),
                        error = %err,
                        "non-streaming attempt failed"
                    );
                    last_error = Some(format!("{}: {}", upstream.name(), err));
                    attempt.fail(&err.to_string());
                }
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<Bytes>, frame: String) -> bool {
    tx.send(Bytes::from(frame)).is_ok()
}
