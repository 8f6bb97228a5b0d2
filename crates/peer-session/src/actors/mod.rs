//! Actor model implementation for the peer-session coordinator.
//!
//! ```text
//! CoordinatorActor (one per client)
//! ├── owns MediaSourceHolder, RemoteParticipantRegistry, ChatRelay
//! ├── owns one CallSession per remote participant
//! └── spawns short-lived acquisition tasks that report back via the mailbox
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: all state lives inside the actor; adapters and the
//!   presentation layer talk to it through `CoordinatorHandle`
//! - **One mailbox**: FIFO delivery keeps per-peer event order
//! - **CancellationToken propagation**: acquisition tasks run under a child token
//!
//! # Modules
//!
//! - [`coordinator`] - `CoordinatorActor` and its handle
//! - [`messages`] - Message, snapshot and presentation event types
//! - [`metrics`] - Mailbox monitoring
//! - [`session`] - Per-peer call session state

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod session;

pub use coordinator::{CoordinatorActor, CoordinatorHandle};
pub use messages::*;
pub use metrics::{ActorType, MailboxMonitor};
pub use session::{CallDirection, CallSession, CallState};
