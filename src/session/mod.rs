//! Session management for telebridge.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────┐        ┌────────────────┐
//!  │ SessionRegistry │─spawns─▶ SessionWorker  │  (one per session, runs in a tokio task)
//!  │ (ID → Entry)    │        │  owns phase +  │
//!  └────────┬────────┘        │  client, one   │
//!           │ ▲               │  op at a time  │
//!           │ └──deregisters──┴───────▲────────┘
//!           │ clone                   │ unbounded mpsc + oneshot reply
//!           ▼                         │
//!  ┌─────────────────┐                │
//!  │  SessionHandle  │────────────────┘  (cheap cloneable sender)
//!  └─────────────────┘
//! ```
//!
//! - **SessionWorker**: owns the auth phase and the messaging client; applies
//!   operations sequentially, so the state machine is never touched concurrently.
//! - **SessionHandle**: cloneable queue sender. `submit_and_wait` enqueues an
//!   operation and suspends until the worker records that operation's outcome.
//! - **SessionRegistry**: maps session IDs to handles and metadata; admits,
//!   dispatches, lists, and shuts down workers.

mod handle;
mod registry;
mod types;
mod worker;

#[cfg(test)]
mod test_support;

pub use handle::{PendingOutcome, SessionHandle};
pub use registry::SessionRegistry;
pub use types::{
    AuthPhase, CLIENT_ID_PREFIX, Operation, OperationResult, Outcome, SessionError,
    SessionMetadata,
};
