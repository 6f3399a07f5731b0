use crate::connection::ConnectionId;
use thiserror::Error;

/// Errors produced by the relay hub and its transports.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("connection already registered: {0}")]
    DuplicateRegistration(ConnectionId),

    #[error("send failed: {0}")]
    Send(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
