//! # Peer-Session Test Utilities
//!
//! Shared test utilities for the peer-session coordinator.
//!
//! This crate provides recording implementations of the coordinator's ports
//! and stream fixtures, so call flows can be driven event by event without a
//! signaling server, a transport or capture devices.
//!
//! ## Modules
//!
//! - `mock_signaling` - Records every signaling action
//! - `mock_transport` - Records calls, answers and closes; can refuse peers
//! - `mock_devices` - Capture devices resolved by the test, one request at a time
//! - `fixtures` - Stream and identifier fixtures
//! - `harness` - `TestCall`, a coordinator wired to all three mocks
//! - `eventual` - Polling assertions for multi-actor tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peer_session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let call = TestCall::joined("room1", "a").await;
//!
//!     call.remote_joins("b").await;
//!     let call_id = call.transport.last_call_to(&pid("b")).unwrap();
//!     call.stream("b", call_id, camera_stream()).await;
//!
//!     assert_eq!(call.snapshot().await.participant_ids(), vec!["b"]);
//! }
//! ```

pub mod eventual;
pub mod fixtures;
pub mod harness;
pub mod mock_devices;
pub mod mock_signaling;
pub mod mock_transport;

// Re-export commonly used items
pub use eventual::*;
pub use fixtures::*;
pub use harness::*;
pub use mock_devices::*;
pub use mock_signaling::*;
pub use mock_transport::*;
