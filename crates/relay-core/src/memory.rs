//! In-process loopback transport.
//!
//! [`connection`] builds one connection as three handles: the hub-side
//! [`MemorySink`] and [`MemorySource`], plus the [`MemoryPeer`] that plays the
//! remote client. Used by tests and by embedders that relay between tasks of
//! the same process.

use crate::connection::{ConnectionId, MessageSink, MessageSource};
use crate::error::{HubError, HubResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

enum Inbound {
    Text(String),
    Reset(String),
}

/// Create a loopback connection whose peer reports `remote` as its address.
pub fn connection(remote: &str) -> (Arc<MemorySink>, MemorySource, MemoryPeer) {
    let open = Arc::new(AtomicBool::new(true));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let sink = Arc::new(MemorySink {
        id: ConnectionId::next(),
        remote: remote.to_string(),
        open: open.clone(),
        fail_sends: AtomicBool::new(false),
        outbound: outbound_tx,
    });
    let source = MemorySource {
        inbound: inbound_rx,
        open: open.clone(),
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        open,
    };
    (sink, source, peer)
}

/// Hub-side outbound half of a loopback connection.
pub struct MemorySink {
    id: ConnectionId,
    remote: String,
    open: Arc<AtomicBool>,
    fail_sends: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemorySink {
    /// Make every subsequent send fail while the open flag stays set.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }
}

impl MessageSink for MemorySink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> &str {
        &self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(HubError::Send(format!("{}: peer unreachable", self.id)));
            }
            if !self.is_open() {
                return Err(HubError::Send(format!("{}: connection closed", self.id)));
            }
            self.outbound
                .send(text.to_string())
                .map_err(|_| HubError::Send(format!("{}: peer dropped", self.id)))
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.open.store(false, Ordering::Relaxed);
            Ok(())
        })
    }
}

/// Hub-side inbound half of a loopback connection.
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    open: Arc<AtomicBool>,
}

impl MessageSource for MemorySource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = HubResult<Option<String>>> + Send + '_>> {
        Box::pin(async move {
            match self.inbound.recv().await {
                Some(Inbound::Text(text)) => Ok(Some(text)),
                Some(Inbound::Reset(reason)) => {
                    self.open.store(false, Ordering::Relaxed);
                    Err(HubError::Transport(reason))
                }
                None => {
                    self.open.store(false, Ordering::Relaxed);
                    Ok(None)
                }
            }
        })
    }
}

/// The remote end of a loopback connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a message to the hub. Returns `false` once the peer is closed.
    pub fn send(&self, text: &str) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Inbound::Text(text.to_string())).is_ok(),
            None => false,
        }
    }

    /// Close the stream gracefully.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        self.inbound = None;
    }

    /// Terminate the stream abruptly, as a socket reset would.
    pub fn reset(&mut self, reason: &str) {
        self.open.store(false, Ordering::Relaxed);
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Inbound::Reset(reason.to_string()));
        }
    }

    /// Next message delivered by the hub, waiting for it.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next message delivered by the hub, if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// All messages delivered so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(msg) = self.try_recv() {
            messages.push(msg);
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peer_messages_reach_source() {
        let (_sink, mut source, peer) = connection("127.0.0.1:1000");
        assert!(peer.send("hello"));
        assert_eq!(source.recv().await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn sink_messages_reach_peer() {
        let (sink, _source, mut peer) = connection("127.0.0.1:1000");
        assert_eq!(sink.remote_addr(), "127.0.0.1:1000");
        sink.send("one").await.unwrap();
        sink.send("").await.unwrap();
        assert_eq!(peer.drain(), vec!["one".to_string(), String::new()]);
    }

    #[tokio::test]
    async fn close_is_graceful() {
        let (sink, mut source, mut peer) = connection("a");
        peer.close();
        assert!(!sink.is_open());
        assert_eq!(source.recv().await.unwrap(), None);
        assert!(sink.send("late").await.is_err());
        assert!(!peer.send("late"));
    }

    #[tokio::test]
    async fn reset_is_abrupt() {
        let (sink, mut source, mut peer) = connection("a");
        peer.reset("connection reset by peer");
        assert!(!sink.is_open());
        assert!(matches!(source.recv().await, Err(HubError::Transport(_))));
    }

    #[tokio::test]
    async fn fail_sends_keeps_open_flag() {
        let (sink, _source, mut peer) = connection("a");
        sink.fail_sends(true);
        assert!(sink.is_open());
        assert!(matches!(sink.send("x").await, Err(HubError::Send(_))));
        assert!(peer.try_recv().is_none());
    }
}
