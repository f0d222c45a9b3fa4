use thiserror::Error;

/// Errors raised by the connection, protocol and interpreter layers.
///
/// None of these escape `Session::submit` or `Session::receive_frame`; the
/// session turns them into notices or log lines.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A frame was sent while the connection was not open.
    #[error("connection is not open")]
    ConnectionUnavailable,

    /// An inbound frame could not be decoded into a response envelope.
    #[error("malformed inbound frame: {0}")]
    MalformedInbound(String),

    /// The socket failed or was closed outside the user's control.
    #[error("transport error: {0}")]
    Transport(String),

    /// The configured backend address cannot be turned into a socket endpoint.
    #[error("invalid backend address `{address}`: {reason}")]
    InvalidBackend { address: String, reason: String },

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}
