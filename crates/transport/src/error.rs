//! Transport errors.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("start handshake not received within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("websocket closed before start handshake")]
    ClosedBeforeHandshake,

    #[error("websocket send failed: {0}")]
    Send(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
