//! Publishing session
//!
//! Ties capture, compositing, the peer session and the ingest together
//! behind one state machine.

pub mod controller;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{SessionController, SessionDeps, SessionHandle, SessionSettings};
pub use state::{ReconnectPolicy, SessionState, SessionStatus, SourceMode};
