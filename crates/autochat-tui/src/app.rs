use autochat_core::{Connection, Session, SubmitOutcome};
use tokio::sync::watch;
use url::Url;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,
    pub session: Session<Connection>,
    pub endpoint: Url,

    // Input state
    pub input_cursor: usize,

    // Chat viewport, refreshed on every render
    pub chat_scroll: u16,
    pub max_scroll: u16,
    pub chat_height: u16,
    /// Keep the newest message in view until the user scrolls up
    pub follow_tail: bool,

    pub animation_frame: u8,
    /// One-line notice shown in the footer
    pub status: Option<String>,

    changes: watch::Receiver<u64>,
}

impl App {
    pub fn new(session: Session<Connection>, endpoint: Url) -> Self {
        let changes = session.subscribe();
        Self {
            should_quit: false,
            session,
            endpoint,
            input_cursor: 0,
            chat_scroll: 0,
            max_scroll: 0,
            chat_height: 0,
            follow_tail: true,
            animation_frame: 0,
            status: None,
            changes,
        }
    }

    /// True when the session changed since the last call.
    pub fn take_changes(&mut self) -> bool {
        let changed = self.changes.has_changed().unwrap_or(false);
        if changed {
            self.changes.borrow_and_update();
        }
        changed
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.state().awaiting_response {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn submit(&mut self) {
        match self.session.submit_input() {
            SubmitOutcome::Sent => self.status = None,
            SubmitOutcome::ConnectionLost => {
                self.status = Some(format!("Not connected to {}", self.endpoint));
            }
            SubmitOutcome::Ignored => return,
        }
        self.input_cursor = 0;
        self.follow_tail = true;
    }

    pub fn clear_chat(&mut self) {
        self.session.clear();
        self.chat_scroll = 0;
        self.follow_tail = true;
        self.status = None;
    }

    /// Most recent image reference in the thread
    pub fn latest_image(&self) -> Option<&str> {
        self.session
            .state()
            .messages
            .iter()
            .rev()
            .find_map(|m| m.image_url.as_deref())
    }

    pub fn open_latest_image(&mut self) {
        let Some(url) = self.latest_image().map(str::to_string) else {
            self.status = Some("No image in this conversation".to_string());
            return;
        };
        self.status = Some(match open::that(&url) {
            Ok(()) => format!("Opened {}", url),
            Err(e) => {
                tracing::warn!(error = %e, %url, "Could not open image");
                format!("Could not open {}: {}", url, e)
            }
        });
    }

    // Chat scrolling

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = self.chat_scroll >= self.max_scroll;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll);
        self.follow_tail = self.chat_scroll >= self.max_scroll;
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    /// Record the rendered thread height and settle the scroll offset.
    pub fn update_viewport(&mut self, total_lines: u16, height: u16) {
        self.chat_height = height;
        self.max_scroll = total_lines.saturating_sub(height);
        if self.follow_tail {
            self.chat_scroll = self.max_scroll;
        } else {
            self.chat_scroll = self.chat_scroll.min(self.max_scroll);
        }
    }

    // Input editing

    pub fn insert_char(&mut self, c: char) {
        let cursor = self.input_cursor;
        self.session.edit_input(|input| {
            let byte_pos = char_to_byte_index(input, cursor);
            input.insert(byte_pos, c);
        });
        self.input_cursor += 1;
    }

    pub fn delete_before_cursor(&mut self) {
        if self.input_cursor == 0 {
            return;
        }
        self.input_cursor -= 1;
        let cursor = self.input_cursor;
        self.session.edit_input(|input| {
            let byte_pos = char_to_byte_index(input, cursor);
            input.remove(byte_pos);
        });
    }

    pub fn delete_at_cursor(&mut self) {
        let cursor = self.input_cursor;
        self.session.edit_input(|input| {
            if cursor < input.chars().count() {
                let byte_pos = char_to_byte_index(input, cursor);
                input.remove(byte_pos);
            }
        });
    }

    pub fn cursor_left(&mut self) {
        self.input_cursor = self.input_cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        let char_count = self.session.state().pending_input.chars().count();
        self.input_cursor = (self.input_cursor + 1).min(char_count);
    }

    pub fn cursor_home(&mut self) {
        self.input_cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.input_cursor = self.session.state().pending_input.chars().count();
    }
}
