//! Turns inbound frames into display text plus an optional image reference.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::error::ChatError;
use crate::protocol::InboundFrame;

static IMAGE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Absolute web image URLs, or paths under the backend's `images/` directory
fn image_regex() -> &'static Regex {
    IMAGE_REGEX.get_or_init(|| {
        Regex::new(
            r"(?ix)
            (https?://\S+\.(?:png|jpe?g|gif|webp))
            |
            (\.?/?images/\S+\.(?:png|jpe?g|gif|webp))
            ",
        )
        .expect("Failed to compile image reference regex")
    })
}

/// Result of interpreting one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInbound {
    pub display_text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    /// Backend base address without a trailing slash
    base_url: String,
}

impl Interpreter {
    pub fn new(base: &Url) -> Self {
        Self::with_base(base.as_str())
    }

    pub fn with_base(base: &str) -> Self {
        Self {
            base_url: base.trim_end_matches('/').to_string(),
        }
    }

    /// Decode a raw frame and extract its image reference.
    pub fn parse(&self, raw: &str) -> Result<ParsedInbound, ChatError> {
        let text = InboundFrame::decode(raw)?.into_text();
        Ok(self.extract(&text))
    }

    /// Split the first image reference out of `text`. A message is assumed to
    /// carry at most one image.
    pub fn extract(&self, text: &str) -> ParsedInbound {
        let Some(found) = image_regex().find(text) else {
            return ParsedInbound {
                display_text: text.to_string(),
                image_url: None,
            };
        };

        let mut remaining = String::with_capacity(text.len());
        remaining.push_str(&text[..found.start()]);
        remaining.push_str(&text[found.end()..]);

        ParsedInbound {
            display_text: remaining.trim().to_string(),
            image_url: Some(self.resolve(found.as_str())),
        }
    }

    fn resolve(&self, reference: &str) -> String {
        if reference.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("http")) {
            reference.to_string()
        } else if let Some(rest) = reference.strip_prefix("./") {
            format!("{}/{}", self.base_url, rest)
        } else if reference.starts_with('/') {
            format!("{}{}", self.base_url, reference)
        } else {
            format!("{}/{}", self.base_url, reference)
        }
    }
}
