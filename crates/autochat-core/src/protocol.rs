//! Wire envelopes exchanged with the backend and socket endpoint derivation.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChatError;

/// Path the backend serves its chat socket on.
pub const SESSION_PATH: &str = "/ws";

/// Outbound envelope: `{"message": "<user text>"}`
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    pub message: &'a str,
}

impl<'a> OutboundFrame<'a> {
    pub fn new(message: &'a str) -> Self {
        Self { message }
    }

    pub fn encode(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound envelope. The backend answers with `response`, either as plain
/// text or as an object carrying the text in `raw`. It reports its own
/// failures with an `error` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Response { response: ResponseBody },
    Error { error: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Text(String),
    Structured { raw: String },
}

impl InboundFrame {
    pub fn decode(raw: &str) -> Result<Self, ChatError> {
        serde_json::from_str(raw).map_err(|e| ChatError::MalformedInbound(e.to_string()))
    }

    /// Normalize either envelope shape into the single string to display.
    pub fn into_text(self) -> String {
        match self {
            InboundFrame::Response { response: ResponseBody::Text(text) } => text,
            InboundFrame::Response { response: ResponseBody::Structured { raw } } => raw,
            InboundFrame::Error { error } => format!("Error: {}", error),
        }
    }
}

/// Parse a configured backend base address.
pub fn parse_backend(address: &str) -> Result<Url, ChatError> {
    Url::parse(address.trim()).map_err(|e| ChatError::InvalidBackend {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Socket endpoint for a backend base address: same host and port, `ws`/`wss`
/// in place of `http`/`https`, and the fixed session path.
pub fn socket_endpoint(base: &Url) -> Result<Url, ChatError> {
    let invalid = |reason: &str| ChatError::InvalidBackend {
        address: base.to_string(),
        reason: reason.to_string(),
    };

    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(invalid("expected an http or https address")),
    };
    let host = base.host_str().ok_or_else(|| invalid("address has no host"))?;

    let mut endpoint = format!("{}://{}", scheme, host);
    if let Some(port) = base.port() {
        endpoint.push_str(&format!(":{}", port));
    }
    endpoint.push_str(SESSION_PATH);

    Url::parse(&endpoint).map_err(|e| invalid(&e.to_string()))
}
