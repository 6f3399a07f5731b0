//! relay-core: connection registry and broadcast hub for the chat relay.
//!
//! Transport-agnostic. A transport hands each accepted connection to
//! [`BroadcastHub::serve`] as a [`MessageSink`] / [`MessageSource`] pair; the
//! hub registers it, relays everything it sends to all other connections and
//! deregisters it when the stream ends.

pub mod connection;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod memory;
pub mod registry;

// Re-export commonly used items at crate root.
pub use connection::{ConnectionId, MessageSink, MessageSource};
pub use error::{HubError, HubResult};
pub use hub::{echo_frame, BroadcastHub, BroadcastReport, HubConfig, DEFAULT_ECHO_PREFIX};
pub use lifecycle::{ConnectionState, Lifecycle, Termination};
pub use registry::ConnectionRegistry;
