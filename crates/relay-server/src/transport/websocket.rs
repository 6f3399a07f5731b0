//! WebSocket listener using tokio-tungstenite.
//!
//! Every accepted socket completes the WebSocket handshake in its own task and
//! is handed to the server as a [`WebSocketConnection`], which splits into the
//! hub's [`MessageSink`] / [`MessageSource`] halves.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{ConnectionId, HubError, HubResult, MessageSink, MessageSource};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<TcpStream>;

/// An accepted WebSocket connection, not yet handed to the hub.
pub struct WebSocketConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
}

impl WebSocketConnection {
    /// Split into the hub-facing halves.
    pub fn split(self) -> (Arc<WsSink>, WsSource) {
        let id = ConnectionId::next();
        let open = Arc::new(AtomicBool::new(true));
        let (writer, reader) = self.ws_stream.split();

        let sink = Arc::new(WsSink {
            id,
            remote: self.remote_addr.to_string(),
            open: open.clone(),
            writer: Mutex::new(writer),
        });
        let source = WsSource { id, reader, open };
        (sink, source)
    }

    /// Turn the connection away with a close frame.
    pub async fn reject(mut self, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::Again,
            reason: reason.into(),
        };
        if let Err(e) = self.ws_stream.close(Some(frame)).await {
            debug!(remote = %self.remote_addr, error = %e, "close after reject failed");
        }
    }
}

/// Bind the listener and start accepting.
///
/// Returns the bound address and a receiver that yields connections whose
/// handshake succeeded. Bind failure is the only error.
///
/// Frames and messages larger than `max_message_size` bytes are refused by
/// the protocol layer before they are buffered.
pub async fn start_listener(
    host: &str,
    port: u16,
    max_message_size: usize,
) -> HubResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| HubError::Transport(format!("WS bind {host}:{port} failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_message_size);
    ws_config.max_frame_size = Some(max_message_size);

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let handshake =
                            tokio_tungstenite::accept_async_with_config(stream, Some(ws_config));
                        match handshake.await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("WebSocket listener stopped");
                break;
            }
        }
    });

    Ok((local_addr, rx))
}

/// Outbound half of a WebSocket connection.
pub struct WsSink {
    id: ConnectionId,
    remote: String,
    open: Arc<AtomicBool>,
    writer: Mutex<SplitSink<WsStream, Message>>,
}

impl MessageSink for WsSink {
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
            if !self.is_open() {
                return Err(HubError::Send(format!("{}: connection closed", self.id)));
            }
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(text.to_string().into()))
                .await
                .map_err(|e| {
                    self.open.store(false, Ordering::Relaxed);
                    HubError::Send(format!("{}: WS send failed: {e}", self.id))
                })
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.open.store(false, Ordering::Relaxed);
            let mut writer = self.writer.lock().await;
            writer
                .close()
                .await
                .map_err(|e| HubError::Transport(format!("{}: WS close failed: {e}", self.id)))
        })
    }
}

/// Inbound half of a WebSocket connection.
pub struct WsSource {
    id: ConnectionId,
    reader: SplitStream<WsStream>,
    open: Arc<AtomicBool>,
}

impl MessageSource for WsSource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = HubResult<Option<String>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match String::from_utf8(data.to_vec()) {
                            Ok(text) => return Ok(Some(text)),
                            Err(_) => {
                                warn!(conn = %self.id, len = data.len(), "ignoring non-UTF-8 binary message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.open.store(false, Ordering::Relaxed);
                        return Ok(None);
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite.
                        continue;
                    }
                    Some(Err(WsError::Capacity(e))) => {
                        self.open.store(false, Ordering::Relaxed);
                        return Err(HubError::InvalidMessage(format!("WS message rejected: {e}")));
                    }
                    Some(Err(e)) => {
                        self.open.store(false, Ordering::Relaxed);
                        return Err(HubError::Transport(format!("WS recv failed: {e}")));
                    }
                }
            }
        })
    }
}
