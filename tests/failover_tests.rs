//! End-to-end failover scenarios over scripted mock upstreams.

mod common;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use common::*;
use nexus_gateway::{
    core::{circuit_breaker::CircuitState, upstream::ProviderKind},
    policies::RoutingMode,
    protocols::events::DONE_FRAME,
};

#[tokio::test]
async fn single_upstream_happy_path() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["Hel", "lo"])),
    );
    let engine = engine(vec![u1.clone()]);

    let frames = run_streaming(&engine, RoutingMode::Smart).await;
    assert_eq!(frames.len(), 4);

    assert!(is_metadata(&frames[0]));
    let meta = frame_json(&frames[0]);
    assert_eq!(meta["metadata"]["provider"], "groq-1");
    assert_eq!(meta["metadata"]["requestId"], "chatcmpl-test");

    assert_eq!(chunk_content(&frames[1]).as_deref(), Some("Hel"));
    assert_eq!(chunk_content(&frames[2]).as_deref(), Some("lo"));
    assert_eq!(frames[3], DONE_FRAME);

    let metrics = u1.metrics().snapshot();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.fail_count, 0);
    let breaker = u1.breaker().snapshot();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failover_on_first_token_timeout() {
    // Round-robin makes the order deterministic: the hung upstream first.
    let u1 = upstream(ProviderKind::Groq, 1, 0.10, MockAdapter::new(Script::Hang));
    let u2 = upstream(
        ProviderKind::Groq,
        2,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["ok"])),
    );
    let engine = engine(vec![u1.clone(), u2.clone()]);

    let frames = run_streaming(&engine, RoutingMode::RoundRobin).await;

    let metadata_frames: Vec<_> = frames.iter().filter(|f| is_metadata(f)).collect();
    assert_eq!(metadata_frames.len(), 1, "exactly one metadata frame");
    assert_eq!(frame_json(metadata_frames[0])["metadata"]["provider"], "groq-2");

    let contents: Vec<String> = frames.iter().filter_map(|f| chunk_content(f)).collect();
    assert_eq!(contents, vec!["ok"]);
    assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));

    let m1 = u1.metrics().snapshot();
    assert_eq!(m1.total_requests, 1);
    assert_eq!(m1.fail_count, 1);
    assert_eq!(u1.breaker().snapshot().failures, 1);
    assert!(m1
        .last_error
        .expect("timeout recorded")
        .message
        .contains("timeout"));

    let m2 = u2.metrics().snapshot();
    assert_eq!(m2.total_requests, 1);
    assert_eq!(m2.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_then_recovers() {
    let adapter = MockAdapter::with_sequence(
        vec![
            Script::FailImmediately("boom 1"),
            Script::FailImmediately("boom 2"),
            Script::FailImmediately("boom 3"),
        ],
        Script::Chunks(vec!["recovered"]),
    );
    let u1 = upstream(ProviderKind::Gemini, 1, 0.0, adapter);
    let engine = engine(vec![u1.clone()]);

    for _ in 0..3 {
        let frames = run_streaming(&engine, RoutingMode::Smart).await;
        // No chunk was ever emitted: one error frame, then the sentinel.
        assert_eq!(frames.len(), 2);
        assert!(frame_json(&frames[0])["error"]["type"] == "gateway_error");
        assert_eq!(frames[1], DONE_FRAME);
    }

    let breaker = u1.breaker().snapshot();
    assert_eq!(breaker.state, CircuitState::Open);
    assert!(breaker.last_failure.is_some());
    assert_eq!(u1.metrics().snapshot().fail_count, 3);

    // With the only upstream open, a request exhausts without an attempt.
    let frames = run_streaming(&engine, RoutingMode::Smart).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frame_json(&frames[0])["error"]["message"],
        "no upstreams available"
    );
    assert_eq!(u1.metrics().snapshot().total_requests, 3);

    // After the reset timeout, the next selection probes HALF_OPEN and one
    // success closes the breaker.
    tokio::time::advance(Duration::from_millis(60_001)).await;
    let frames = run_streaming(&engine, RoutingMode::Smart).await;
    let contents: Vec<String> = frames.iter().filter_map(|f| chunk_content(f)).collect();
    assert_eq!(contents, vec!["recovered"]);

    let breaker = u1.breaker().snapshot();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failures, 0);
    assert_eq!(u1.metrics().snapshot().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn no_failover_after_commit() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::ChunksThenError(vec!["partial"], "connection reset")),
    );
    let u2 = upstream(
        ProviderKind::Groq,
        2,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["never"])),
    );
    let engine = engine(vec![u1.clone(), u2.clone()]);

    let frames = run_streaming(&engine, RoutingMode::RoundRobin).await;

    let metadata_frames: Vec<_> = frames.iter().filter(|f| is_metadata(f)).collect();
    assert_eq!(metadata_frames.len(), 1);
    assert_eq!(frame_json(metadata_frames[0])["metadata"]["provider"], "groq-1");

    let contents: Vec<String> = frames.iter().filter_map(|f| chunk_content(f)).collect();
    assert_eq!(contents, vec!["partial"]);
    // Terminated with the sentinel, but no error frame after a commit.
    assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
    assert!(!frames.iter().any(|f| f.contains("gateway_error")));

    let m1 = u1.metrics().snapshot();
    assert_eq!(m1.fail_count, 1);
    assert!(m1
        .last_error
        .expect("mid-stream error recorded")
        .message
        .contains("connection reset"));

    // The second upstream was never considered.
    assert_eq!(u2.metrics().snapshot().total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_upstream_excluded_from_selection() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["should not run"])),
    );
    let u2 = upstream(
        ProviderKind::Groq,
        2,
        0.10,
        MockAdapter::new(Script::FailImmediately("bad key")),
    );
    u1.set_enabled(false);
    let engine = engine(vec![u1.clone(), u2.clone()]);

    let frames = run_streaming(&engine, RoutingMode::RoundRobin).await;

    // U2 fails and U1 is never considered: exhaustion.
    assert_eq!(frames.len(), 2);
    let error = frame_json(&frames[0]);
    assert_eq!(error["error"]["type"], "gateway_error");
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("bad key"));
    assert_eq!(frames[1], DONE_FRAME);

    assert_eq!(u1.metrics().snapshot().total_requests, 0);
    assert_eq!(u2.metrics().snapshot().fail_count, 1);
}

#[tokio::test]
async fn empty_body_counts_as_success() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::EmptyBody),
    );
    let engine = engine(vec![u1.clone()]);

    let frames = run_streaming(&engine, RoutingMode::Smart).await;
    // No metadata, no error frame: just the sentinel.
    assert_eq!(frames, vec![DONE_FRAME.to_string()]);

    let metrics = u1.metrics().snapshot();
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.fail_count, 0);
}

#[tokio::test]
async fn non_streaming_matches_streaming_concatenation() {
    let streaming_upstream = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["Hel", "lo"])),
    );
    let streaming_engine = engine(vec![streaming_upstream]);
    let frames = run_streaming(&streaming_engine, RoutingMode::Smart).await;
    let concatenated: String = frames
        .iter()
        .filter_map(|f| chunk_content(f))
        .collect::<Vec<_>>()
        .join("");

    let completion_upstream = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["Hel", "lo"])),
    );
    let completion_engine = engine(vec![completion_upstream]);
    let payload = completion_engine
        .complete_chat(request_context(RoutingMode::Smart))
        .await
        .expect("completion succeeds");

    assert_eq!(
        payload["choices"][0]["message"]["content"].as_str().unwrap(),
        concatenated
    );
    assert_eq!(payload["object"], "chat.completion");
}

#[tokio::test(start_paused = true)]
async fn non_streaming_failover_and_exhaustion() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::FailImmediately("down 1")),
    );
    let u2 = upstream(
        ProviderKind::Groq,
        2,
        0.10,
        MockAdapter::new(Script::FailImmediately("down 2")),
    );
    let engine = engine(vec![u1.clone(), u2.clone()]);

    let result = engine
        .complete_chat(request_context(RoutingMode::RoundRobin))
        .await;
    let err = result.expect_err("all upstreams failed");
    assert!(err.to_string().contains("all upstreams failed"));

    // Both were tried exactly once.
    assert_eq!(u1.metrics().snapshot().fail_count, 1);
    assert_eq!(u2.metrics().snapshot().fail_count, 1);
}

#[tokio::test]
async fn client_disconnect_before_commit_stops_the_loop() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::Chunks(vec!["unseen"])),
    );
    let engine = engine(vec![u1.clone()]);

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    drop(rx);
    engine
        .stream_chat(request_context(RoutingMode::Smart), tx)
        .await;

    // The disconnect was observed before any attempt was dispatched.
    assert_eq!(u1.metrics().snapshot().total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn client_disconnect_mid_stream_records_cancellation() {
    let u1 = upstream(
        ProviderKind::Groq,
        1,
        0.10,
        MockAdapter::new(Script::SlowSecondChunk(
            "first",
            Duration::from_millis(500),
            "second",
        )),
    );
    let engine_handle = std::sync::Arc::new(engine(vec![u1.clone()]));

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let task = {
        let engine = std::sync::Arc::clone(&engine_handle);
        tokio::spawn(async move {
            engine
                .stream_chat(request_context(RoutingMode::Smart), tx)
                .await;
        })
    };

    // Metadata frame, then the first chunk.
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
    drop(rx);

    task.await.expect("engine task completes");

    let metrics = u1.metrics().snapshot();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.fail_count, 1);
    assert_eq!(
        metrics.last_error.expect("cancellation recorded").message,
        "cancelled"
    );
    // A client hangup does not trip the breaker.
    assert_eq!(u1.breaker().snapshot().failures, 0);
}

#[tokio::test(start_paused = true)]
async fn tried_upstreams_are_not_retried_within_a_request() {
    // Three upstreams, all failing: each is attempted exactly once.
    let upstreams: Vec<_> = (1..=3)
        .map(|i| {
            upstream(
                ProviderKind::Groq,
                i,
                0.10,
                MockAdapter::new(Script::FailImmediately("down")),
            )
        })
        .collect();
    let engine = engine(upstreams.clone());

    let frames = run_streaming(&engine, RoutingMode::RoundRobin).await;
    assert_eq!(frames.len(), 2);
    for u in &upstreams {
        assert_eq!(u.metrics().snapshot().total_requests, 1);
    }
}
