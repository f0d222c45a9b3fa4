use autochat_core::{ChatMessage, ChatRole, ConnectionState, SessionState};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use crate::app::App;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let parts: Vec<&str> = text.split("**").collect();
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut plain = String::new();

    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            plain.push_str(part);
        } else if i == parts.len() - 1 {
            // No closing **, treat as literal
            plain.push_str("**");
            plain.push_str(part);
        } else if !part.is_empty() {
            if !plain.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut plain)));
            }
            spans.push(Span::styled(
                part.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        }
    }

    if !plain.is_empty() {
        spans.push(Span::raw(plain));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.session.connection_state();
    let state_color = match state {
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Open => Color::Green,
        ConnectionState::Closed => Color::Red,
    };

    let header = Line::from(vec![
        Span::styled(
            " autochat ",
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(app.endpoint.to_string(), Style::default().fg(Color::DarkGray)),
        Span::raw("  "),
        Span::styled(format!("● {}", state.as_str()), Style::default().fg(state_color)),
    ]);

    frame.render_widget(Paragraph::new(header), area);
}

fn message_lines(message: &ChatMessage, lines: &mut Vec<Line<'static>>) {
    let time = message.sent_at.format("%H:%M").to_string();
    match message.role {
        ChatRole::User => {
            lines.push(Line::from(vec![
                Span::styled("You", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                Span::styled(format!(" · {}", time), Style::default().fg(Color::DarkGray)),
            ]));
            for line in message.content.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        ChatRole::Assistant => {
            lines.push(Line::from(vec![
                Span::styled("Assistant", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Span::styled(format!(" · {}", time), Style::default().fg(Color::DarkGray)),
            ]));
            for line in message.content.lines() {
                lines.push(parse_markdown_line(line));
            }
            if let Some(url) = &message.image_url {
                lines.push(Line::from(vec![
                    Span::styled("[image] ", Style::default().fg(Color::Magenta)),
                    Span::styled(
                        url.clone(),
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::UNDERLINED),
                    ),
                ]));
            }
        }
    }
    lines.push(Line::default());
}

fn thread_lines(state: &SessionState, animation_frame: u8) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for message in &state.messages {
        message_lines(message, &mut lines);
    }

    if state.awaiting_response {
        lines.push(Line::from(Span::styled(
            "Assistant",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let state = app.session.state();
    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);

    let chat_text = if state.messages.is_empty() && !state.awaiting_response {
        Text::from(Span::styled(
            "Send a message to start the conversation.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(thread_lines(state, app.animation_frame))
    };

    // Count rows as the wrapped paragraph will lay them out
    let chat = Paragraph::new(chat_text).wrap(Wrap { trim: false });
    let total_lines = u16::try_from(chat.line_count(inner_width)).unwrap_or(u16::MAX);
    app.update_viewport(total_lines, inner_height);

    let chat = chat.block(chat_block).scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.session.state();
    let connected = app.session.connection_state() == ConnectionState::Open;

    let (title, border_color) = if state.awaiting_response {
        (" Waiting for reply... ", Color::DarkGray)
    } else if connected {
        (" Message (Enter to send) ", Color::Yellow)
    } else {
        (" Message (not connected) ", Color::Red)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = state
        .pending_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let label_style = Style::default().fg(Color::DarkGray);

    let mut spans = vec![
        Span::styled(" Enter", key_style),
        Span::styled(" send  ", label_style),
        Span::styled("Ctrl+L", key_style),
        Span::styled(" clear  ", label_style),
        Span::styled("Ctrl+O", key_style),
        Span::styled(" open image  ", label_style),
        Span::styled("PgUp/PgDn", key_style),
        Span::styled(" scroll  ", label_style),
        Span::styled("Esc", key_style),
        Span::styled(" quit", label_style),
    ];

    if let Some(status) = &app.status {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::Magenta)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
