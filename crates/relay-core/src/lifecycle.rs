//! Per-connection lifecycle state machine.

use crate::connection::ConnectionId;
use std::fmt;
use tracing::{trace, warn};

/// Where a connection is in its life inside the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Registered,
    Receiving,
    Delivering,
    Closing,
    Deregistered,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, Registered)
                | (Registered, Receiving)
                | (Receiving, Delivering)
                | (Delivering, Receiving)
                | (Registered, Closing)
                | (Receiving, Closing)
                | (Delivering, Closing)
                | (Closing, Deregistered)
        )
    }
}

/// Why a connection's receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The peer closed the stream gracefully.
    PeerClosed,
    /// The stream broke: socket reset, malformed frame, oversized message.
    Transport(String),
    /// No inbound message within the idle timeout.
    IdleTimeout,
    /// The hub is shutting down.
    Shutdown,
}

impl Termination {
    pub fn is_graceful(&self) -> bool {
        !matches!(self, Termination::Transport(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::PeerClosed => write!(f, "peer closed"),
            Termination::Transport(e) => write!(f, "{e}"),
            Termination::IdleTimeout => write!(f, "idle timeout"),
            Termination::Shutdown => write!(f, "hub shutdown"),
        }
    }
}

/// Tracks one connection's state and rejects illegal transitions.
#[derive(Debug)]
pub struct Lifecycle {
    id: ConnectionId,
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Accepted,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`. Returns `false` and leaves the state untouched if the
    /// transition is illegal; `Deregistered` is terminal.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(conn = %self.id, from = ?self.state, to = ?next, "illegal lifecycle transition");
            return false;
        }
        trace!(conn = %self.id, from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
        true
    }
}
