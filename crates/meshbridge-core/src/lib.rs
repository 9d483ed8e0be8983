//! Core types for the mesh bridge.
//!
//! This crate provides the message envelope exchanged with the mesh agent and
//! the deframer that recovers messages from its undelimited byte stream.

mod deframe;
mod message;

pub use deframe::deframe;
pub use message::{
    ContentError, EVENT_NAME_KEY, Header, Message, NODE_NAME_KEY, PeerEvent, Route, json_kind,
};

/// Connection lifecycle state, as driven by the reconnect supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing the peer socket.
    Connecting,
    /// Connected; the receive loop is running.
    Running,
    /// Waiting out the reconnect delay.
    BackoffWait,
    /// Cancelled; no further I/O.
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Running => write!(f, "running"),
            Self::BackoffWait => write!(f, "backoff"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
