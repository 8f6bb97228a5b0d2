//! Observability for the peer-session coordinator.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit fields. Chat text
//! and stream contents are never logged; participant ids are.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `peer_session_calls_placed_total` | Counter | none | Outbound calls placed |
//! | `peer_session_calls_answered_total` | Counter | `outcome` | Inbound offers handled |
//! | `peer_session_duplicate_sessions_total` | Counter | none | Deduplicated calls |
//! | `peer_session_stale_acquisitions_total` | Counter | none | Superseded media released |
//! | `peer_session_media_failures_total` | Counter | `kind` | Failed source acquisitions |
//! | `peer_session_calls_abandoned_total` | Counter | none | Pending calls timed out |
//! | `peer_session_participants_active` | Gauge | none | Rendered remote participants |
//! | `peer_session_chat_messages_total` | Counter | `direction` | Chat traffic |

pub mod metrics;

pub use metrics::{
    record_call_abandoned, record_call_answered, record_call_placed, record_chat_message,
    record_duplicate_session, record_media_failure, record_message_dropped,
    record_stale_acquisition, set_actor_mailbox_depth, set_participants_active,
};
