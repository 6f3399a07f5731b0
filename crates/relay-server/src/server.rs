//! Core server: binds the WebSocket listener and hands every accepted
//! connection to the broadcast hub in its own task.

use crate::config::ServerConfig;
use crate::limit::ConnectionLimiter;
use crate::transport::websocket::{self, WebSocketConnection};
use relay_core::{BroadcastHub, HubResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long shutdown waits for connections to say goodbye.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The chat relay server, before binding.
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
}

impl RelayServer {
    /// Create a server and its hub. Nothing is bound yet.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.hub_config()));
        Self { config, hub }
    }

    /// Bind the listener. Failure here is fatal to the process.
    pub async fn bind(self) -> HubResult<BoundServer> {
        let (local_addr, incoming) =
            websocket::start_listener(
            &self.config.host,
            self.config.port,
            self.config.max_message_size,
        )
        .await?;
        Ok(BoundServer {
            limiter: ConnectionLimiter::new(self.config.max_connections),
            config: self.config,
            hub: self.hub,
            local_addr,
            incoming,
        })
    }
}

/// A server whose listener is bound and accepting.
pub struct BoundServer {
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    limiter: ConnectionLimiter,
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<WebSocketConnection>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    /// Serve connections until the listener stops.
    pub async fn run(mut self) -> HubResult<()> {
        info!(
            addr = %self.local_addr,
            max_connections = self.config.max_connections,
            idle_timeout = ?self.config.idle_timeout,
            "chat relay running on ws://{}",
            self.local_addr
        );

        while let Some(conn) = self.incoming.recv().await {
            self.accept(conn);
        }

        info!("listener closed, shutting down");
        shutdown(&self.hub).await;
        Ok(())
    }

    fn accept(&self, conn: WebSocketConnection) {
        let hub = self.hub.clone();
        // Reserved here, on the accept loop, so two handshakes finishing
        // together cannot both take the last slot.
        let slot = self.limiter.try_acquire();
        let limit = self.limiter.max();

        tokio::spawn(async move {
            let Some(_slot) = slot else {
                warn!(
                    remote = %conn.remote_addr,
                    limit,
                    "connection limit reached, rejecting"
                );
                conn.reject("server full").await;
                return;
            };

            let (sink, source) = conn.split();
            if let Err(e) = hub.serve(sink, source).await {
                warn!(error = %e, "WebSocket connection error");
            }
        });
    }
}

/// Signal every connection to close and wait, up to a grace period, for
/// them to deregister.
pub async fn shutdown(hub: &BroadcastHub) {
    hub.shutdown();
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while hub.client_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    debug!(remaining = hub.client_count(), "shutdown drain finished");
}
