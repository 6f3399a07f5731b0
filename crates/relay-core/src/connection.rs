//! Connection abstraction shared by every transport.
//!
//! A live connection is split in two halves: a [`MessageSink`] that the hub
//! keeps in its registry and writes to during fan-out, and a
//! [`MessageSource`] owned by the connection's own receive loop.

use crate::error::HubResult;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque connection identity. Registry membership is keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh identity. Ids increase monotonically, so ordering by
    /// id is ordering by accept time.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a connection.
pub trait MessageSink: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Peer address, for diagnostics only.
    fn remote_addr(&self) -> &str;

    /// Whether the connection can still accept data.
    fn is_open(&self) -> bool;

    /// Deliver one text message. Fails with `HubError::Send` once the
    /// connection is closed or broken.
    fn send<'a>(&'a self, text: &'a str)
        -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + 'a>>;

    /// Close the connection from the hub side. Closing an already closed
    /// connection is not an error.
    fn close(&self) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + '_>>;
}

/// Inbound half of a connection.
pub trait MessageSource: Send {
    /// Wait for the next inbound text message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream gracefully and an
    /// error when it terminated abruptly.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = HubResult<Option<String>>> + Send + '_>>;
}
