//! UI-agnostic session state types
//!
//! These structures are what a presentation layer reads to render the thread.
//! They don't depend on any UI framework.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A message in the conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub sent_at: DateTime<Local>,
    /// Absolute image reference extracted from an assistant reply
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            sent_at: Local::now(),
            image_url: None,
        }
    }

    pub fn assistant(content: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            sent_at: Local::now(),
            image_url,
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
}

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Append-only thread, in arrival order
    pub messages: Vec<ChatMessage>,
    pub pending_input: String,
    /// True between a submit and the next inbound frame (or failure)
    pub awaiting_response: bool,
}
