//! Persistent socket to the chat backend.
//!
//! The socket itself lives in a background task. The session loop owns the
//! [`Connection`] handle, pushes outbound frames through it and receives
//! [`ConnectionEvent`]s back on a channel, so every state change happens on
//! the loop that drains those events.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ChatError;
use crate::protocol::OutboundFrame;

/// How long [`Connection::shutdown`] waits for the close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Lifecycle and data events reported by the socket task
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened,
    /// One received text frame, unparsed
    Frame(String),
    Closed { reason: Option<String> },
    Failed(ChatError),
}

/// What a session needs from its channel to the backend.
pub trait Transport {
    fn state(&self) -> ConnectionState;

    /// Send one user message. Fails with `ConnectionUnavailable` unless open.
    fn send(&mut self, message: &str) -> Result<(), ChatError>;

    /// Apply a lifecycle event reported for this channel.
    fn observe(&mut self, event: &ConnectionEvent);

    /// Release the channel. Calling it again is a no-op.
    fn close(&mut self);
}

pub struct Connection {
    endpoint: Url,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Start connecting to `endpoint`. Must be called inside a tokio runtime.
    pub fn open(endpoint: Url) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        info!(%endpoint, "Connecting to backend");
        let task = tokio::spawn(run_socket(endpoint.clone(), outbound_rx, event_tx));

        let connection = Self {
            endpoint,
            state: ConnectionState::Connecting,
            outbound: Some(outbound_tx),
            task: Some(task),
        };
        (connection, event_rx)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Close and wait for the socket task to deliver its close frame.
    ///
    /// `close()` only signals the task, which is lost if the runtime stops
    /// right after. Call this before leaving `main`.
    pub async fn shutdown(&mut self) {
        self.close();
        let Some(mut task) = self.task.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!(endpoint = %self.endpoint, "Close handshake timed out");
            task.abort();
        }
    }

    fn release(&mut self) {
        // Dropping the sender makes an open socket task send a close frame and exit
        self.outbound.take();
        if self.state == ConnectionState::Connecting {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
        self.state = ConnectionState::Closed;
    }
}

impl Transport for Connection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, message: &str) -> Result<(), ChatError> {
        if self.state != ConnectionState::Open {
            return Err(ChatError::ConnectionUnavailable);
        }
        let frame = OutboundFrame::new(message).encode()?;

        let delivered = self
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok());
        if !delivered {
            warn!("Socket task is gone, marking connection closed");
            self.release();
            return Err(ChatError::ConnectionUnavailable);
        }
        Ok(())
    }

    fn observe(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                // A late Opened after close() must not revive the connection
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                }
            }
            ConnectionEvent::Closed { .. } | ConnectionEvent::Failed(_) => self.release(),
            ConnectionEvent::Frame(_) => {}
        }
    }

    fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            self.outbound.take();
            return;
        }
        info!(endpoint = %self.endpoint, "Closing connection");
        self.release();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    endpoint: Url,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let stream = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Failed(ChatError::Transport(e.to_string())));
            return;
        }
    };
    if events.send(ConnectionEvent::Opened).is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(frame) => {
                    debug!(bytes = frame.len(), "Sending frame");
                    if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                        let _ = events.send(ConnectionEvent::Failed(ChatError::Transport(e.to_string())));
                        return;
                    }
                }
                None => {
                    // Handle dropped: deliberate close
                    let _ = ws_tx.send(Message::Close(None)).await;
                    let _ = events.send(ConnectionEvent::Closed { reason: None });
                    return;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    debug!(bytes = text.len(), "Received frame");
                    if events.send(ConnectionEvent::Frame(text.to_string())).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if events.send(ConnectionEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Err(_) => warn!(bytes = bytes.len(), "Skipping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    let _ = events.send(ConnectionEvent::Closed { reason });
                    return;
                }
                // Ping/pong replies are queued by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ConnectionEvent::Failed(ChatError::Transport(e.to_string())));
                    return;
                }
                None => {
                    let _ = events.send(ConnectionEvent::Closed { reason: None });
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_open_is_unavailable() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (mut connection, _events) = Connection::open(endpoint);

        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(matches!(
            connection.send("oi"),
            Err(ChatError::ConnectionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (mut connection, _events) = Connection::open(endpoint);

        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);

        connection.observe(&ConnectionEvent::Opened);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.send("oi").is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_closes() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (mut connection, _events) = Connection::open(endpoint);

        connection.observe(&ConnectionEvent::Opened);
        assert_eq!(connection.state(), ConnectionState::Open);

        connection.observe(&ConnectionEvent::Failed(ChatError::Transport("reset".into())));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_while_connecting_returns() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (mut connection, _events) = Connection::open(endpoint);

        connection.shutdown().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.task.is_none());

        // Second call has nothing left to wait for
        connection.shutdown().await;
    }
}
