pub mod config;
pub mod connection;
pub mod error;
pub mod interpreter;
pub mod protocol;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionState, Transport};
pub use error::ChatError;
pub use interpreter::{Interpreter, ParsedInbound};
pub use protocol::{parse_backend, socket_endpoint};
pub use session::{Session, SubmitOutcome};
pub use state::{ChatMessage, ChatRole, SessionState};
