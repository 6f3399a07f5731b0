//! The broadcast hub: fan-out of inbound messages and per-connection
//! lifecycle.
//!
//! Each connection is served by its own task running [`BroadcastHub::serve`].
//! The task registers the connection, reads one message at a time and awaits
//! [`BroadcastHub::broadcast`] for it before reading the next, then
//! deregisters the connection however the loop ended.

use crate::connection::{ConnectionId, MessageSink, MessageSource};
use crate::error::{HubError, HubResult};
use crate::lifecycle::{ConnectionState, Lifecycle, Termination};
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Prefix added to a message when it is echoed back to its sender.
pub const DEFAULT_ECHO_PREFIX: &str = "You: ";

/// Default upper bound on a single delivery during fan-out.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Prefix for the copy of a message delivered back to its sender.
    pub echo_prefix: String,
    /// Close connections that send nothing for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// A delivery that takes longer than this counts as failed.
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo_prefix: DEFAULT_ECHO_PREFIX.to_string(),
            idle_timeout: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was handed to.
    pub delivered: usize,
    /// Connections skipped because they were no longer open.
    pub skipped: usize,
    /// Connections whose send failed or timed out.
    pub failed: usize,
}

/// The form of `message` delivered back to the connection that sent it.
pub fn echo_frame(prefix: &str, message: &str) -> String {
    let mut framed = String::with_capacity(prefix.len() + message.len());
    framed.push_str(prefix);
    framed.push_str(message);
    framed
}

/// Relays every inbound message to all registered connections.
pub struct BroadcastHub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: watch::Sender<bool>,
}

impl BroadcastHub {
    /// Create a hub with an empty registry.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_tx: watch::channel(false).0,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Read access to the registry, for diagnostics.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of currently registered connections.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Deliver `message` to every open connection in a snapshot of the
    /// registry: echo-framed to `sender`, verbatim to everyone else.
    ///
    /// Deliveries are independent. A failed or timed out send is counted and
    /// skipped; the connection is left for its own lifecycle to remove.
    pub async fn broadcast(&self, sender: ConnectionId, message: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let echo = echo_frame(&self.config.echo_prefix, message);

        for conn in self.registry.snapshot() {
            if !conn.is_open() {
                report.skipped += 1;
                continue;
            }

            let payload = if conn.id() == sender {
                echo.as_str()
            } else {
                message
            };

            match tokio::time::timeout(self.config.send_timeout, conn.send(payload)).await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    debug!(conn = %conn.id(), error = %e, "delivery failed");
                    report.failed += 1;
                }
                Err(_) => {
                    debug!(conn = %conn.id(), "delivery timed out");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Serve one connection until its stream ends.
    ///
    /// Fails only if the connection is already registered. Every other way
    /// the stream can end is reported as a [`Termination`], after the
    /// connection has been deregistered.
    pub async fn serve<S: MessageSource>(
        &self,
        sink: Arc<dyn MessageSink>,
        mut source: S,
    ) -> HubResult<Termination> {
        let id = sink.id();
        let remote = sink.remote_addr().to_string();
        let mut lifecycle = Lifecycle::new(id);

        if let Err(e) = self.registry.register(sink.clone()) {
            error!(conn = %id, remote = %remote, error = %e, "refusing connection");
            return Err(e);
        }
        let registration = Registration {
            registry: self.registry.clone(),
            id,
        };
        lifecycle.advance(ConnectionState::Registered);
        info!(conn = %id, remote = %remote, clients = self.registry.len(), "client connected");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let termination = loop {
            lifecycle.advance(ConnectionState::Receiving);
            if *shutdown_rx.borrow_and_update() {
                break Termination::Shutdown;
            }

            let received = tokio::select! {
                _ = shutdown_rx.changed() => break Termination::Shutdown,
                received = self.receive(&mut source) => received,
            };

            match received {
                Ok(Some(message)) => {
                    lifecycle.advance(ConnectionState::Delivering);
                    let report = self.broadcast(id, &message).await;
                    trace!(
                        conn = %id,
                        delivered = report.delivered,
                        skipped = report.skipped,
                        failed = report.failed,
                        "message relayed"
                    );
                }
                Ok(None) => break Termination::PeerClosed,
                Err(HubError::Timeout) => break Termination::IdleTimeout,
                Err(e) => break Termination::Transport(e.to_string()),
            }
        };

        lifecycle.advance(ConnectionState::Closing);
        drop(registration);
        lifecycle.advance(ConnectionState::Deregistered);

        // A peer that stopped reading can stall the close handshake.
        match tokio::time::timeout(self.config.send_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = %id, error = %e, "close failed"),
            Err(_) => debug!(conn = %id, "close timed out"),
        }

        if termination.is_graceful() {
            info!(
                conn = %id,
                remote = %remote,
                reason = %termination,
                clients = self.registry.len(),
                "client disconnected"
            );
        } else {
            info!(
                conn = %id,
                remote = %remote,
                error = %termination,
                clients = self.registry.len(),
                "client dropped"
            );
        }

        Ok(termination)
    }

    /// Ask every running [`serve`](Self::serve) loop to finish.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        info!(clients = self.registry.len(), "hub shutting down");
    }

    async fn receive<S: MessageSource>(&self, source: &mut S) -> HubResult<Option<String>> {
        match self.config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, source.recv())
                .await
                .map_err(|_| HubError::Timeout)?,
            None => source.recv().await,
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Removes a connection from the registry when dropped, so deregistration
/// also happens when the serving task is cancelled or panics.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
