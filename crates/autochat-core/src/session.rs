//! The chat session: owns the thread state and the connection, and applies
//! user intents and connection events to them.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionEvent, ConnectionState, Transport};
use crate::interpreter::{Interpreter, ParsedInbound};
use crate::state::{ChatMessage, SessionState};

pub const CONNECTION_LOST_NOTICE: &str =
    "Connection to the server was lost. Restart the session to reconnect.";
pub const TIMEOUT_NOTICE: &str = "The server did not reply in time. You can send another message.";

/// What happened to a submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank text, or a reply is still pending
    Ignored,
    Sent,
    /// The connection was not open; a notice was appended instead
    ConnectionLost,
}

pub struct Session<T: Transport> {
    transport: T,
    interpreter: Interpreter,
    state: SessionState,
    response_timeout: Option<Duration>,
    awaiting_since: Option<Instant>,
    changes: watch::Sender<u64>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, interpreter: Interpreter) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            transport,
            interpreter,
            state: SessionState::default(),
            response_timeout: None,
            awaiting_since: None,
            changes,
        }
    }

    /// Give up on a pending reply after `timeout`. Without it the session waits forever.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Receiver whose value is bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    fn touch(&self) {
        self.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub fn set_pending_input(&mut self, text: impl Into<String>) {
        self.state.pending_input = text.into();
        self.touch();
    }

    /// Edit the pending input in place.
    pub fn edit_input<R>(&mut self, edit: impl FnOnce(&mut String) -> R) -> R {
        let result = edit(&mut self.state.pending_input);
        self.touch();
        result
    }

    pub fn submit_input(&mut self) -> SubmitOutcome {
        let text = self.state.pending_input.clone();
        self.submit(&text)
    }

    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() || self.state.awaiting_response {
            return SubmitOutcome::Ignored;
        }

        self.state.messages.push(ChatMessage::user(text));
        self.state.pending_input.clear();
        self.state.awaiting_response = true;

        let outcome = match self.transport.send(text) {
            Ok(()) => {
                debug!(chars = text.chars().count(), "Message sent");
                self.awaiting_since = Some(Instant::now());
                SubmitOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "Could not send message");
                self.push_notice(CONNECTION_LOST_NOTICE);
                SubmitOutcome::ConnectionLost
            }
        };
        self.touch();
        outcome
    }

    /// Append an assistant reply. Accepted even when nothing is pending.
    pub fn receive(&mut self, parsed: ParsedInbound) {
        if !self.state.awaiting_response {
            debug!("Reply arrived with no pending request");
        }
        self.state
            .messages
            .push(ChatMessage::assistant(parsed.display_text, parsed.image_url));
        self.finish_waiting();
        self.touch();
    }

    /// Interpret one raw inbound frame.
    pub fn receive_frame(&mut self, raw: &str) {
        match self.interpreter.parse(raw) {
            Ok(parsed) => self.receive(parsed),
            Err(e) => {
                warn!(error = %e, "Dropping inbound frame");
                self.finish_waiting();
                self.touch();
            }
        }
    }

    /// Empty the thread. The connection and any pending reply are untouched.
    pub fn clear(&mut self) {
        self.state.messages.clear();
        self.touch();
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        self.transport.observe(&event);

        match event {
            ConnectionEvent::Opened => info!("Connection open"),
            ConnectionEvent::Frame(raw) => {
                self.receive_frame(&raw);
                return;
            }
            ConnectionEvent::Closed { reason } => {
                info!(reason = reason.as_deref().unwrap_or("none"), "Connection closed");
                self.abandon_pending(CONNECTION_LOST_NOTICE);
            }
            ConnectionEvent::Failed(e) => {
                warn!(error = %e, "Connection failed");
                self.abandon_pending(CONNECTION_LOST_NOTICE);
            }
        }
        self.touch();
    }

    /// Drop a pending reply that has outlived the response timeout.
    /// Returns true when it did.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        let (Some(timeout), Some(since)) = (self.response_timeout, self.awaiting_since) else {
            return false;
        };
        if !self.state.awaiting_response || now.saturating_duration_since(since) < timeout {
            return false;
        }
        warn!(timeout_secs = timeout.as_secs(), "No reply within timeout");
        self.abandon_pending(TIMEOUT_NOTICE);
        self.touch();
        true
    }

    /// Close the connection. Also happens when the session is dropped.
    pub fn end(&mut self) {
        self.transport.close();
        self.touch();
    }

    fn abandon_pending(&mut self, notice: &str) {
        if self.state.awaiting_response {
            self.push_notice(notice);
        }
    }

    fn push_notice(&mut self, notice: &str) {
        self.state.messages.push(ChatMessage::assistant(notice, None));
        self.finish_waiting();
    }

    fn finish_waiting(&mut self) {
        self.state.awaiting_response = false;
        self.awaiting_since = None;
    }
}

impl Session<Connection> {
    /// End the session and wait for the close frame to reach the backend.
    pub async fn shutdown(&mut self) {
        self.transport.shutdown().await;
        self.touch();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::state::ChatRole;

    #[derive(Default)]
    struct FakeTransport {
        state: ConnectionState,
        sent: Vec<String>,
    }

    impl FakeTransport {
        fn open() -> Self {
            Self {
                state: ConnectionState::Open,
                sent: Vec::new(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn state(&self) -> ConnectionState {
            self.state
        }

        fn send(&mut self, message: &str) -> Result<(), ChatError> {
            if self.state != ConnectionState::Open {
                return Err(ChatError::ConnectionUnavailable);
            }
            self.sent.push(message.to_string());
            Ok(())
        }

        fn observe(&mut self, event: &ConnectionEvent) {
            match event {
                ConnectionEvent::Opened if self.state == ConnectionState::Connecting => {
                    self.state = ConnectionState::Open
                }
                ConnectionEvent::Closed { .. } | ConnectionEvent::Failed(_) => {
                    self.state = ConnectionState::Closed
                }
                _ => {}
            }
        }

        fn close(&mut self) {
            self.state = ConnectionState::Closed;
        }
    }

    fn session(transport: FakeTransport) -> Session<FakeTransport> {
        Session::new(transport, Interpreter::with_base("http://localhost:8001"))
    }

    fn reply(text: &str) -> ParsedInbound {
        ParsedInbound {
            display_text: text.to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_submit_while_open_sends_one_frame() {
        let mut session = session(FakeTransport::open());
        session.set_pending_input("oi");

        assert_eq!(session.submit_input(), SubmitOutcome::Sent);
        assert_eq!(session.transport.sent, vec!["oi".to_string()]);
        assert_eq!(session.state().messages.len(), 1);
        assert_eq!(session.state().messages[0].role, ChatRole::User);
        assert!(session.state().pending_input.is_empty());
        assert!(session.state().awaiting_response);

        session.handle_connection_event(ConnectionEvent::Frame(r#"{"response":"olá"}"#.into()));
        assert_eq!(session.state().messages.len(), 2);
        assert_eq!(session.state().messages[1].role, ChatRole::Assistant);
        assert_eq!(session.state().messages[1].content, "olá");
        assert!(!session.state().awaiting_response);
    }

    #[test]
    fn test_submit_while_not_open_appends_notice() {
        let mut session = session(FakeTransport::default());

        assert_eq!(session.submit("oi"), SubmitOutcome::ConnectionLost);
        assert!(session.transport.sent.is_empty());
        let messages = &session.state().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, CONNECTION_LOST_NOTICE);
        assert!(!session.state().awaiting_response);
    }

    #[test]
    fn test_only_one_request_in_flight() {
        let mut session = session(FakeTransport::open());

        assert_eq!(session.submit("first"), SubmitOutcome::Sent);
        for text in ["second", "third", "fourth"] {
            assert_eq!(session.submit(text), SubmitOutcome::Ignored);
        }
        assert_eq!(session.transport.sent.len(), 1);
        assert_eq!(session.state().messages.len(), 1);

        session.receive(reply("ok"));
        assert_eq!(session.submit("second"), SubmitOutcome::Sent);
        assert_eq!(session.transport.sent.len(), 2);
    }

    #[test]
    fn test_blank_submits_are_ignored() {
        let mut session = session(FakeTransport::open());
        session.set_pending_input("   ");

        assert_eq!(session.submit(""), SubmitOutcome::Ignored);
        assert_eq!(session.submit("   "), SubmitOutcome::Ignored);
        assert_eq!(session.submit_input(), SubmitOutcome::Ignored);
        assert!(session.state().messages.is_empty());
        assert!(session.transport.sent.is_empty());
        assert!(!session.state().awaiting_response);
        assert_eq!(session.state().pending_input, "   ");
    }

    #[test]
    fn test_receive_always_clears_awaiting() {
        let mut session = session(FakeTransport::open());

        session.receive(reply("pushed by the server"));
        assert!(!session.state().awaiting_response);
        assert_eq!(session.state().messages.len(), 1);

        session.submit("oi");
        session.receive(reply("olá"));
        assert!(!session.state().awaiting_response);
    }

    #[test]
    fn test_clear_then_receive_appends_one() {
        let mut session = session(FakeTransport::open());
        session.submit("oi");

        session.clear();
        assert!(session.state().messages.is_empty());
        assert!(session.state().awaiting_response);

        session.receive(reply("olá"));
        assert_eq!(session.state().messages.len(), 1);
        assert!(!session.state().awaiting_response);
    }

    #[test]
    fn test_malformed_frame_clears_awaiting_without_message() {
        let mut session = session(FakeTransport::open());
        session.submit("oi");

        session.handle_connection_event(ConnectionEvent::Frame("{not json".into()));
        assert_eq!(session.state().messages.len(), 1);
        assert!(!session.state().awaiting_response);
    }

    #[test]
    fn test_image_reference_is_carried_on_message() {
        let mut session = session(FakeTransport::open());
        session.receive_frame(r#"{"response":"Veja ./images/car1.jpg"}"#);

        let message = &session.state().messages[0];
        assert_eq!(message.content, "Veja");
        assert_eq!(
            message.image_url.as_deref(),
            Some("http://localhost:8001/images/car1.jpg")
        );
    }

    #[test]
    fn test_connection_drop_while_waiting_appends_notice() {
        let mut session = session(FakeTransport::open());
        session.submit("oi");

        session.handle_connection_event(ConnectionEvent::Failed(ChatError::Transport(
            "reset by peer".into(),
        )));
        assert_eq!(session.connection_state(), ConnectionState::Closed);
        assert!(!session.state().awaiting_response);
        assert_eq!(session.state().messages.len(), 2);
        assert_eq!(session.state().messages[1].content, CONNECTION_LOST_NOTICE);

        assert_eq!(session.submit("again"), SubmitOutcome::ConnectionLost);
    }

    #[test]
    fn test_idle_close_adds_no_notice() {
        let mut session = session(FakeTransport::open());
        session.handle_connection_event(ConnectionEvent::Closed { reason: None });

        assert_eq!(session.connection_state(), ConnectionState::Closed);
        assert!(session.state().messages.is_empty());
    }

    #[test]
    fn test_opened_event_enables_sending() {
        let mut session = session(FakeTransport::default());
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        session.handle_connection_event(ConnectionEvent::Opened);
        assert_eq!(session.connection_state(), ConnectionState::Open);
        assert_eq!(session.submit("oi"), SubmitOutcome::Sent);
    }

    #[test]
    fn test_no_timeout_waits_forever() {
        let mut session = session(FakeTransport::open());
        session.submit("oi");

        let later = Instant::now() + Duration::from_secs(24 * 60 * 60);
        assert!(!session.check_timeout(later));
        assert!(session.state().awaiting_response);
    }

    #[test]
    fn test_timeout_abandons_pending_reply() {
        let mut session =
            session(FakeTransport::open()).with_response_timeout(Some(Duration::from_secs(30)));
        session.submit("oi");

        assert!(!session.check_timeout(Instant::now()));
        assert!(session.check_timeout(Instant::now() + Duration::from_secs(31)));
        assert!(!session.state().awaiting_response);
        assert_eq!(session.state().messages[1].content, TIMEOUT_NOTICE);

        // a late reply is still shown
        session.receive(reply("late"));
        assert_eq!(session.state().messages.len(), 3);
    }

    #[test]
    fn test_every_change_bumps_revision() {
        let mut session = session(FakeTransport::open());
        let mut changes = session.subscribe();
        let start = session.revision();

        session.edit_input(|input| input.push_str("oi"));
        session.submit_input();
        session.receive(reply("olá"));
        session.clear();

        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), start + 4);
    }

    #[test]
    fn test_end_closes_transport() {
        let mut session = session(FakeTransport::open());
        session.end();
        assert_eq!(session.connection_state(), ConnectionState::Closed);
        session.end();
        assert_eq!(session.connection_state(), ConnectionState::Closed);
    }
}
