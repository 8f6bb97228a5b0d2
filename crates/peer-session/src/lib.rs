//! Peer-session coordinator library
//!
//! Coordinates one client's side of a small mesh video call:
//!
//! - Joins a room over a signaling channel and calls every other member
//! - Answers inbound calls and renders each remote participant exactly once
//! - Swaps the outgoing video between camera and screen without leaking streams
//! - Mirrors room chat into an ordered log
//!
//! # Architecture
//!
//! ```text
//! SignalingChannel ──events──┐
//! PeerTransport ─────events──┼──> CoordinatorActor ──> RemoteParticipantRegistry
//! Presentation ─────intents──┘          │          ──> MediaSourceHolder
//!                                       │          ──> ChatRelay
//!                                       └──actions──> SignalingChannel / PeerTransport
//! ```
//!
//! The signaling channel, peer transport and capture devices are traits in
//! [`ports`]. [`hub`] and [`loopback`] provide in-process implementations used
//! by the demo binary and the integration tests.
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, messages and call sessions
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types with presentation error codes
//! - [`media`] - Stream handles and the local media holder
//! - [`registry`] - Remote participant registry
//! - [`chat`] - Chat relay and log
//! - [`ports`] - Signaling, transport and capture traits
//! - [`hub`] - In-process room hub (signaling)
//! - [`loopback`] - In-process peer network and simulated devices
//! - [`observability`] - Metrics recording

pub mod actors;
pub mod chat;
pub mod config;
pub mod errors;
pub mod hub;
pub mod loopback;
pub mod media;
pub mod observability;
pub mod ports;
pub mod registry;

pub use actors::{CoordinatorActor, CoordinatorHandle};
