//! Abandonment of calls that never produce a stream.
//!
//! Uses tokio's test-util time control to move past the pending timeout
//! without waiting for it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use peer_session::actors::{CallState, PresentationEvent};
use peer_session::config::Config;
use peer_session_test_utils::*;

fn config(timeout_secs: u64) -> Config {
    Config {
        pending_call_timeout: Duration::from_secs(timeout_secs),
        pending_check_interval: Duration::from_secs(5),
        ..Config::default()
    }
}

async fn joined_with(config: Config) -> TestCall {
    let call = TestCall::spawn_with(config, MockTransport::new());
    call.identity("A").await;
    call.handle.join(room("room1")).await.unwrap();
    call
}

#[tokio::test(start_paused = true)]
async fn test_stuck_call_abandoned_after_timeout() {
    let mut call = joined_with(config(30)).await;
    call.remote_joins("B").await;
    let stuck = call.transport.last_call_to(&pid("B")).unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    let snapshot = call.snapshot().await;
    assert_eq!(
        snapshot.session(&pid("B")).unwrap().state,
        CallState::Pending
    );

    tokio::time::advance(Duration::from_secs(15)).await;
    let event = call
        .wait_for_event(|e| matches!(e, PresentationEvent::CallAbandoned { .. }))
        .await;

    assert_eq!(event, PresentationEvent::CallAbandoned { peer: pid("B") });
    assert!(call.snapshot().await.session(&pid("B")).is_none());
    assert!(call.transport.is_closed(stuck));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_calls_survive_timeout() {
    let mut call = joined_with(config(30)).await;
    let streaming = call.offer("C").await;
    let stream_c = camera_stream();
    call.stream("C", streaming, stream_c.clone()).await;
    call.remote_joins("B").await;

    tokio::time::advance(Duration::from_secs(40)).await;
    call.wait_for_event(|e| matches!(e, PresentationEvent::CallAbandoned { .. }))
        .await;
    let snapshot = call.snapshot().await;

    assert_eq!(snapshot.participant_ids(), vec!["C"]);
    assert_eq!(
        snapshot.session(&pid("C")).unwrap().state,
        CallState::Streaming
    );
    assert!(stream_c.is_live());
    assert!(!call.transport.is_closed(streaming));
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_disables_abandonment() {
    let call = joined_with(config(0)).await;
    call.remote_joins("B").await;

    tokio::time::advance(Duration::from_secs(600)).await;
    let snapshot = call.snapshot().await;

    assert_eq!(
        snapshot.session(&pid("B")).unwrap().state,
        CallState::Pending
    );
    assert!(call.transport.closed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_stream_after_abandon_is_released() {
    let mut call = joined_with(config(30)).await;
    call.remote_joins("B").await;
    let stuck = call.transport.last_call_to(&pid("B")).unwrap();

    tokio::time::advance(Duration::from_secs(36)).await;
    call.wait_for_event(|e| matches!(e, PresentationEvent::CallAbandoned { .. }))
        .await;

    let late = camera_stream();
    call.stream("B", stuck, late.clone()).await;
    let snapshot = call.snapshot().await;

    assert!(snapshot.participants.is_empty());
    assert_eq!(late.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_call_hands_over_to_streaming_standby() {
    let call = joined_with(config(30)).await;
    call.remote_joins("B").await;
    let stuck = call.transport.last_call_to(&pid("B")).unwrap();
    let standby = call.offer("B").await;
    let stream_b = camera_stream();
    call.stream("B", standby, stream_b.clone()).await;

    tokio::time::advance(Duration::from_secs(40)).await;
    let transport = call.transport.clone();
    eventually("stuck call closed", move || {
        let transport = transport.clone();
        async move { transport.is_closed(stuck) }
    })
    .await;
    let snapshot = call.snapshot().await;

    let session = snapshot.session(&pid("B")).unwrap();
    assert_eq!(session.state, CallState::Streaming);
    assert_eq!(session.call_id, standby);
    assert_eq!(snapshot.participant(&pid("B")).unwrap().stream, stream_b);
    assert!(stream_b.is_live());
    assert!(!call.transport.is_closed(standby));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_call_hands_over_to_pending_standby() {
    let mut call = joined_with(config(30)).await;
    call.remote_joins("B").await;
    let stuck = call.transport.last_call_to(&pid("B")).unwrap();

    // Standby answered late, so it gets a fresh window
    tokio::time::advance(Duration::from_secs(20)).await;
    let standby = call.offer("B").await;
    tokio::time::advance(Duration::from_secs(15)).await;
    let transport = call.transport.clone();
    eventually("stuck call closed", move || {
        let transport = transport.clone();
        async move { transport.is_closed(stuck) }
    })
    .await;

    let snapshot = call.snapshot().await;
    let session = snapshot.session(&pid("B")).unwrap();
    assert_eq!(session.state, CallState::Pending);
    assert_eq!(session.call_id, standby);

    tokio::time::advance(Duration::from_secs(35)).await;
    let event = call
        .wait_for_event(|e| matches!(e, PresentationEvent::CallAbandoned { .. }))
        .await;
    assert_eq!(event, PresentationEvent::CallAbandoned { peer: pid("B") });
    assert!(call.transport.is_closed(standby));
}

#[tokio::test(start_paused = true)]
async fn test_zero_check_interval_falls_back_to_default() {
    let mut call = TestCall::spawn_with(
        Config {
            pending_check_interval: Duration::ZERO,
            ..Config::default()
        },
        MockTransport::new(),
    );
    call.identity("A").await;
    call.handle.join(room("room1")).await.unwrap();
    call.remote_joins("B").await;

    tokio::time::advance(Duration::from_secs(40)).await;
    let event = call
        .wait_for_event(|e| matches!(e, PresentationEvent::CallAbandoned { .. }))
        .await;

    assert_eq!(event, PresentationEvent::CallAbandoned { peer: pid("B") });
    assert!(!call.task.is_finished());
}
