//! Transports that feed accepted connections into the hub.

pub mod websocket;
