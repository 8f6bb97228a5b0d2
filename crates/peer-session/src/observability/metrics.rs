//! Metrics definitions for the peer-session coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `peer_session_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: new_session, duplicate, rejected, failed
//! - `kind`: access_denied, unavailable
//! - `direction`: sent, received
//! - `actor_type`: coordinator, hub, loopback
//!
//! No recorder is installed by this crate; without one the facade is a no-op.

use metrics::{counter, gauge};

// ============================================================================
// Call Metrics (Counters)
// ============================================================================

/// Record an outbound call placed.
///
/// Metric: `peer_session_calls_placed_total`
pub fn record_call_placed() {
    counter!("peer_session_calls_placed_total").increment(1);
}

/// Record an inbound offer handled.
///
/// Metric: `peer_session_calls_answered_total`
/// Labels: `outcome` (new_session, duplicate, rejected, failed)
pub fn record_call_answered(outcome: &str) {
    counter!("peer_session_calls_answered_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a call that would have created a second session for one peer.
///
/// Metric: `peer_session_duplicate_sessions_total`
pub fn record_duplicate_session() {
    counter!("peer_session_duplicate_sessions_total").increment(1);
}

/// Record a pending call abandoned after the timeout.
///
/// Metric: `peer_session_calls_abandoned_total`
pub fn record_call_abandoned() {
    counter!("peer_session_calls_abandoned_total").increment(1);
}

// ============================================================================
// Media Metrics (Counters)
// ============================================================================

/// Record a superseded acquisition that resolved and was released.
///
/// Metric: `peer_session_stale_acquisitions_total`
pub fn record_stale_acquisition() {
    counter!("peer_session_stale_acquisitions_total").increment(1);
}

/// Record a failed source acquisition.
///
/// Metric: `peer_session_media_failures_total`
/// Labels: `kind` (access_denied, unavailable)
pub fn record_media_failure(kind: &str) {
    counter!("peer_session_media_failures_total", "kind" => kind.to_string()).increment(1);
}

// ============================================================================
// Participant and Chat Metrics
// ============================================================================

/// Set the number of remote participants currently rendered.
///
/// Metric: `peer_session_participants_active`
pub fn set_participants_active(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("peer_session_participants_active").set(count as f64);
}

/// Record a chat message.
///
/// Metric: `peer_session_chat_messages_total`
/// Labels: `direction` (sent, received)
pub fn record_chat_message(direction: &str) {
    counter!("peer_session_chat_messages_total", "direction" => direction.to_string()).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `peer_session_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("peer_session_actor_mailbox_depth", "actor_type" => actor_type.to_string())
        .set(depth as f64);
}

/// Record messages dropped due to backpressure.
///
/// Metric: `peer_session_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &str) {
    counter!("peer_session_messages_dropped_total", "actor_type" => actor_type.to_string())
        .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    fn counter_value(
        snapshot: &[(
            metrics_util::CompositeKey,
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            DebugValue,
        )],
        name: &str,
    ) -> u64 {
        snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => *v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_metric_functions_are_callable_without_recorder() {
        record_call_placed();
        record_call_answered("new_session");
        record_duplicate_session();
        record_call_abandoned();
        record_stale_acquisition();
        record_media_failure("access_denied");
        set_participants_active(3);
        record_chat_message("sent");
        set_actor_mailbox_depth("coordinator", 0);
        record_message_dropped("hub");
    }

    #[test]
    fn test_counters_recorded_with_expected_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_call_placed();
            record_call_placed();
            record_call_answered("duplicate");
            record_duplicate_session();
            record_stale_acquisition();
            record_media_failure("unavailable");
            record_call_abandoned();
            record_chat_message("received");
            set_participants_active(2);
        });

        let snapshot = snapshotter.snapshot().into_vec();

        assert_eq!(counter_value(&snapshot, "peer_session_calls_placed_total"), 2);
        assert_eq!(counter_value(&snapshot, "peer_session_calls_answered_total"), 1);
        assert_eq!(counter_value(&snapshot, "peer_session_duplicate_sessions_total"), 1);
        assert_eq!(counter_value(&snapshot, "peer_session_stale_acquisitions_total"), 1);
        assert_eq!(counter_value(&snapshot, "peer_session_media_failures_total"), 1);
        assert_eq!(counter_value(&snapshot, "peer_session_calls_abandoned_total"), 1);
        assert_eq!(counter_value(&snapshot, "peer_session_chat_messages_total"), 1);
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "peer_session_participants_active"));
    }
}
