use std::io;
use std::time::{Duration, Instant};

use clap::Args;
use crossterm::cursor::Show;
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Clear, List, ListItem, Paragraph, Wrap,
};
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::Runtime;
use crate::catalog::{self, CUSTOM_PERSONA, MODELS, PERSONAS};
use crate::config;
use crate::dispatch::spawn_validation;
use crate::errors::CliError;
use crate::store::{Message, Role, StoreEvent, Validity};
use crate::tui::handlers::{handle_event, handle_store_event, handle_tui_msg, spawn_health_fetch};
use crate::tui::types::*;

#[derive(Debug, Args)]
pub struct TuiArgs {
    /// Model for this session. Examples: "gpt-4" or "GPT-4.1 Mini"
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, CliError> {
        enable_raw_mode()
            .map_err(|e| CliError::Generic(format!("Failed to enable raw mode: {e}")))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|e| CliError::Generic(format!("Failed to enter alternate screen: {e}")))?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Show, LeaveAlternateScreen);
    }
}

pub async fn handle(runtime: &Runtime, args: TuiArgs) -> Result<(), CliError> {
    if runtime.output.json {
        return Err(CliError::Usage(
            "`--json` is not supported for `chatdeck tui`.".to_string(),
        ));
    }

    let api = runtime.api_client()?;
    let api_url = runtime.resolved_api_url()?;
    let (mut store, validation) = runtime.new_store();
    if let Some(selector) = args.model.as_deref() {
        let model = catalog::find_model(selector).ok_or_else(|| {
            CliError::Usage(format!(
                "Unknown model '{selector}'. Run `chatdeck config models` to list them."
            ))
        })?;
        store.set_model(model);
    }
    let settings_path = config::config_path()?;

    let guard = TerminalGuard::enter()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)
        .map_err(|e| CliError::Generic(format!("Failed to init terminal: {e}")))?;
    terminal
        .clear()
        .map_err(|e| CliError::Generic(format!("Failed to clear terminal: {e}")))?;
    terminal
        .hide_cursor()
        .map_err(|e| CliError::Generic(format!("Failed to hide cursor: {e}")))?;

    let mut app = App::new(store, runtime.settings.clone(), Some(settings_path), api_url);

    let (tx, mut rx) = mpsc::unbounded_channel::<TuiMsg>();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<StoreEvent>();

    app.bg_tasks = app.bg_tasks.saturating_add(1);
    spawn_health_fetch(api.clone(), tx.clone());
    if let Some(request) = validation {
        app.status = "Checking API key...".to_string();
        app.bg_tasks = app.bg_tasks.saturating_add(1);
        spawn_validation(api.clone(), events_tx.clone(), request);
    } else if let Some(reason) = app.store.credential_error() {
        app.status = reason;
    } else if app.store.credential().key().is_empty() {
        app.status = "No API key yet. Press F4 to enter one.".to_string();
    }

    loop {
        update_spinner(&mut app);
        terminal
            .draw(|f| ui(f, &mut app))
            .map_err(|e| CliError::Generic(format!("Failed to draw: {e}")))?;

        if app.should_quit {
            break;
        }

        while let Ok(event) = events_rx.try_recv() {
            handle_store_event(&mut app, event);
        }
        while let Ok(msg) = rx.try_recv() {
            handle_tui_msg(&mut app, msg);
        }

        let poll_ms = if app.bg_tasks > 0 { 40 } else { 120 };
        if crossterm::event::poll(Duration::from_millis(poll_ms))
            .map_err(|e| CliError::Generic(format!("Event poll failed: {e}")))?
        {
            let event = crossterm::event::read()
                .map_err(|e| CliError::Generic(format!("Event read failed: {e}")))?;
            if let Err(err) = handle_event(&api, &tx, &events_tx, &mut app, event) {
                tracing::warn!(error = %err, "key handling failed");
                app.status = format!("Error: {err}");
            }
        }
    }

    terminal
        .show_cursor()
        .map_err(|e| CliError::Generic(format!("Failed to restore cursor: {e}")))?;
    drop(guard);
    Ok(())
}

fn update_spinner(app: &mut App) {
    if !app.store.is_loading() && !app.store.credential().is_validating() {
        return;
    }
    if app.spinner_last.elapsed() >= Duration::from_millis(120) {
        app.spinner_step = app.spinner_step.wrapping_add(1);
        app.spinner_last = Instant::now();
    }
}

fn ui(f: &mut Frame<'_>, app: &mut App) {
    let size = f.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(1),    // chat
            Constraint::Length(3), // input
            Constraint::Length(1), // status
        ])
        .split(size);

    f.render_widget(render_header(app), layout[0]);
    f.render_widget(render_chat(app, layout[1]), layout[1]);
    f.render_widget(render_input(app), layout[2]);
    f.render_widget(render_status(app), layout[3]);

    if app.mode == Mode::Chat {
        let before_cursor = app.input.input[..app.input.cursor.min(app.input.input.len())]
            .iter()
            .map(|c| UnicodeWidthChar::width(*c).unwrap_or(0))
            .sum::<usize>();
        let x = layout[2]
            .x
            .saturating_add(1)
            .saturating_add(INPUT_PREFIX.width() as u16)
            .saturating_add(before_cursor as u16);
        let y = layout[2].y.saturating_add(1);
        f.set_cursor_position((x.min(layout[2].x + layout[2].width.saturating_sub(2)), y));
    }

    match app.mode {
        Mode::ModelPicker => {
            let area = centered_rect(70, 50, size);
            f.render_widget(Clear, area);
            let list = render_model_picker(app);
            f.render_stateful_widget(list, area, &mut app.model_state);
        }
        Mode::PersonaPicker => {
            let area = centered_rect(70, 50, size);
            f.render_widget(Clear, area);
            let list = render_persona_picker(app);
            f.render_stateful_widget(list, area, &mut app.persona_state);
        }
        Mode::KeyPrompt => {
            let area = centered_rect(70, 30, size);
            f.render_widget(Clear, area);
            render_text_prompt_popup(f, app, area, true);
        }
        Mode::DeveloperEditor => {
            let area = centered_rect(70, 40, size);
            f.render_widget(Clear, area);
            render_text_prompt_popup(f, app, area, false);
        }
        Mode::ConfirmClear => {
            let area = centered_rect(50, 20, size);
            f.render_widget(Clear, area);
            f.render_widget(render_confirm_clear(app), area);
        }
        Mode::Help => {
            let area = centered_rect(70, 60, size);
            f.render_widget(Clear, area);
            f.render_widget(render_help(), area);
        }
        Mode::Chat => {}
    }
}

const INPUT_PREFIX: &str = "> ";
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn spinner_frame(step: u64) -> &'static str {
    SPINNER[(step as usize) % SPINNER.len()]
}

fn c_user() -> Color {
    Color::Green
}

fn c_assistant() -> Color {
    Color::Cyan
}

fn c_muted() -> Color {
    Color::DarkGray
}

fn c_warn() -> Color {
    Color::Yellow
}

fn c_err() -> Color {
    Color::Red
}

fn render_header(app: &App) -> Paragraph<'static> {
    let credential = app.store.credential();
    let key_span = if credential.is_validating() {
        Span::styled(
            format!("key {}", spinner_frame(app.spinner_step)),
            Style::default().fg(c_warn()),
        )
    } else {
        match credential.validity() {
            Validity::Valid => Span::styled("key ok", Style::default().fg(c_user())),
            Validity::Invalid(_) => Span::styled("key invalid", Style::default().fg(c_err())),
            Validity::Unchecked if credential.key().is_empty() => {
                Span::styled("no key", Style::default().fg(c_err()))
            }
            Validity::Unchecked => Span::styled("key unchecked", Style::default().fg(c_warn())),
        }
    };

    let sep = || Span::styled(" | ", Style::default().fg(c_muted()));
    let session = app
        .store
        .session_id()
        .map(|s| truncate_to_width(s, 12))
        .unwrap_or_else(|| "new".to_string());

    let mut spans = vec![
        Span::styled(
            "chatdeck ",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.store.model().name.to_string()),
        sep(),
        Span::raw(app.store.persona().to_string()),
        sep(),
        key_span,
        sep(),
        Span::raw(format!("session {session}")),
    ];
    if let Some(health) = &app.health {
        spans.push(sep());
        spans.push(Span::styled(
            format!("{} {health}", app.api_url),
            Style::default().fg(c_muted()),
        ));
    }
    Paragraph::new(Line::from(spans))
}

fn render_chat(app: &App, area: Rect) -> Paragraph<'static> {
    let width = area.width.saturating_sub(2).max(1) as usize;
    let height = area.height.saturating_sub(2).max(1) as usize;

    let typing = app.store.is_loading()
        && app.store.messages().last().map(|m| m.role) != Some(Role::Assistant);
    let all_lines = build_chat_lines(app.store.messages(), width, typing, app.spinner_step);
    let total = all_lines.len();
    let max_scroll = total.saturating_sub(height);
    let scroll = app.scroll_from_bottom.min(max_scroll);
    let top = max_scroll.saturating_sub(scroll);
    let end = (top + height).min(total);

    let visible = all_lines[top..end].to_vec();

    Paragraph::new(Text::from(visible))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Chat (PgUp/PgDn scroll, F1 help)"),
        )
        .wrap(Wrap { trim: false })
}

fn render_input(app: &App) -> Paragraph<'static> {
    let border = if app.store.can_submit() {
        c_user()
    } else {
        c_muted()
    };
    Paragraph::new(Line::from(vec![
        Span::styled(
            INPUT_PREFIX,
            Style::default().fg(border).add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.input.value()),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(border)),
    )
}

fn render_status(app: &App) -> Paragraph<'static> {
    let style = if app.store.credential_error().is_some() {
        Style::default().fg(c_err())
    } else {
        Style::default().fg(c_muted())
    };
    let mut spans = Vec::new();
    if app.store.is_loading() {
        spans.push(Span::styled(
            format!("{} ", spinner_frame(app.spinner_step)),
            Style::default().fg(c_assistant()),
        ));
    }
    spans.push(Span::styled(app.status.clone(), style));
    Paragraph::new(Line::from(spans))
}

fn render_model_picker(app: &App) -> List<'static> {
    let current = app.store.model().value;
    let items = MODELS
        .iter()
        .map(|m| {
            let marker = if m.value == current { "*" } else { " " };
            ListItem::new(vec![
                Line::from(format!("{marker} {}", m.name)),
                Line::from(Span::styled(
                    format!("  {}", m.description),
                    Style::default().fg(c_muted()),
                )),
            ])
        })
        .collect::<Vec<_>>();

    List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Models (Up/Down, Enter select, Esc cancel)"),
        )
        .highlight_style(
            Style::default()
                .bg(c_assistant())
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
}

fn render_persona_picker(app: &App) -> List<'static> {
    let current = app.store.persona();
    let items = PERSONAS
        .iter()
        .map(|p| (p.name, p.prompt))
        .chain(std::iter::once((CUSTOM_PERSONA, "Write your own developer message.")))
        .map(|(name, prompt)| {
            let marker = if name == current { "*" } else { " " };
            ListItem::new(vec![
                Line::from(format!("{marker} {name}")),
                Line::from(Span::styled(
                    format!("  {}", truncate_to_width(prompt, 64)),
                    Style::default().fg(c_muted()),
                )),
            ])
        })
        .collect::<Vec<_>>();

    List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Personas (Up/Down, Enter select, Esc cancel)"),
        )
        .highlight_style(
            Style::default()
                .bg(c_assistant())
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
}

fn render_text_prompt_popup(f: &mut Frame<'_>, app: &App, area: Rect, masked: bool) {
    let (title, hint) = if masked {
        ("API key (checked as you type, Enter/Esc close)", "Paste or type your key.")
    } else {
        ("Developer message (Enter save, Esc cancel)", "Instructions sent with every message.")
    };
    let (input, cursor) = app
        .text_prompt
        .as_ref()
        .map(|p| (p.input.clone(), p.cursor))
        .unwrap_or_default();
    let shown = if masked {
        "*".repeat(input.len())
    } else {
        input.iter().collect::<String>()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = vec![
        Line::from(Span::styled(hint, Style::default().fg(c_muted()))),
        Line::from(""),
        Line::from(vec![
            Span::styled(INPUT_PREFIX, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(shown.clone()),
        ]),
    ];
    if masked {
        let credential = app.store.credential();
        let line = if credential.is_validating() {
            Span::styled("Checking...", Style::default().fg(c_warn()))
        } else if let Some(reason) = credential.error() {
            Span::styled(reason, Style::default().fg(c_err()))
        } else if credential.is_valid() {
            Span::styled("Valid.", Style::default().fg(c_user()))
        } else {
            Span::raw("")
        };
        lines.push(Line::from(""));
        lines.push(Line::from(line));
    }

    f.render_widget(
        Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
        inner,
    );

    let before_cursor = if masked {
        cursor
    } else {
        input[..cursor.min(input.len())]
            .iter()
            .map(|c| UnicodeWidthChar::width(*c).unwrap_or(0))
            .sum()
    };
    let x = inner
        .x
        .saturating_add(INPUT_PREFIX.width() as u16)
        .saturating_add(before_cursor as u16);
    let y = inner.y.saturating_add(2);
    if x < inner.x + inner.width && y < inner.y + inner.height {
        f.set_cursor_position((x, y));
    }
}

fn render_confirm_clear(app: &App) -> Paragraph<'static> {
    let mut lines = vec![
        Line::from("Start a new conversation?"),
        Line::from(""),
    ];
    if app.store.is_loading() {
        lines.push(Line::from(Span::styled(
            "The reply in progress will be discarded.",
            Style::default().fg(c_warn()),
        )));
        lines.push(Line::from(""));
    }
    lines.push(Line::from("y: clear    n / Esc: keep"));

    Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Clear"),
        )
        .wrap(Wrap { trim: false })
}

fn render_help() -> Paragraph<'static> {
    let lines = vec![
        Line::from(vec![Span::styled(
            "chatdeck",
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        Line::from("Enter: send message"),
        Line::from("Esc / Ctrl+C: quit (or close popup)"),
        Line::from("F2: model picker"),
        Line::from("F3: persona picker"),
        Line::from("F4: API key"),
        Line::from("F5: developer message"),
        Line::from("Ctrl+L: new conversation"),
        Line::from("Ctrl+R: check service health"),
        Line::from("PgUp/PgDn: scroll chat"),
        Line::from(""),
        Line::from("Settings are saved as you change them."),
    ];

    Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help (Esc to close)"),
        )
        .wrap(Wrap { trim: false })
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    let vertical = popup_layout[1];
    let popup_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical);

    popup_layout[1]
}

fn build_chat_lines(
    messages: &[Message],
    width: usize,
    typing: bool,
    spinner_step: u64,
) -> Vec<Line<'static>> {
    let mut out = Vec::new();

    if messages.is_empty() && !typing {
        out.push(Line::from(Span::styled(
            "Start a conversation. F1 for keys.",
            Style::default().fg(c_muted()),
        )));
        return out;
    }

    for msg in messages {
        let (tag, color) = match msg.role {
            Role::User => ("You", c_user()),
            Role::Assistant => ("AI", c_assistant()),
        };
        let prefix = format!("[{tag} {}] ", msg.timestamp.format("%H:%M"));
        let prefix_spans = vec![Span::styled(
            prefix.clone(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )];
        let indent = " ".repeat(prefix.width());
        let avail = width.saturating_sub(prefix.width()).max(1);

        let content = msg.content.replace("\r\n", "\n");
        let mut first = true;
        for line in content.split('\n') {
            for part in wrap_line(line, avail) {
                let lead = if first {
                    first = false;
                    prefix_spans.clone()
                } else {
                    vec![Span::raw(indent.clone())]
                };
                let mut spans = lead;
                spans.push(Span::raw(part));
                out.push(Line::from(spans));
            }
        }

        out.push(Line::from(""));
    }

    if typing {
        out.push(Line::from(vec![
            Span::styled(
                "[AI] ",
                Style::default().fg(c_assistant()).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                spinner_frame(spinner_step).to_string(),
                Style::default().fg(c_muted()),
            ),
        ]));
    }
    out
}

fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if width <= 1 {
        return vec![line.to_string()];
    }
    let mut out = Vec::new();
    let mut cur = String::new();

    for word in line.split_whitespace() {
        if word.width() > width {
            // Words longer than a line are split by display width.
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            let mut w = 0usize;
            for ch in word.chars() {
                let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
                if w + cw > width {
                    out.push(std::mem::take(&mut cur));
                    w = 0;
                }
                cur.push(ch);
                w += cw;
            }
            continue;
        }
        if cur.is_empty() {
            cur.push_str(word);
            continue;
        }
        if cur.as_str().width() + 1 + word.width() <= width {
            cur.push(' ');
            cur.push_str(word);
        } else {
            out.push(cur);
            cur = word.to_string();
        }
    }

    if !cur.is_empty() {
        out.push(cur);
    }

    if out.is_empty() {
        out.push(String::new());
    }

    out
}

fn truncate_to_width(input: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if input.width() <= max_width {
        return input.to_string();
    }

    const ELLIPSIS: &str = "…";
    let ell_w = ELLIPSIS.width();
    if max_width <= ell_w {
        return ELLIPSIS.to_string();
    }

    let mut out = String::new();
    let mut w = 0usize;
    for ch in input.chars() {
        let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
        if w + cw + ell_w > max_width {
            break;
        }
        out.push(ch);
        w += cw;
    }
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn wrap_respects_display_width() {
        assert_eq!(wrap_line("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_line("日本語日本語", 6), vec!["日本語", "日本語"]);
        assert_eq!(wrap_line("", 10), vec![String::new()]);
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate_to_width("abcdef", 4), "abc…");
        assert_eq!(truncate_to_width("abc", 4), "abc");
    }

    #[test]
    fn chat_lines_label_and_indent() {
        let messages = vec![
            Message::user("hello there"),
            Message::assistant("first\nsecond"),
        ];
        let lines = build_chat_lines(&messages, 80, false, 0);
        let text = lines.iter().map(line_text).collect::<Vec<_>>();

        assert!(text[0].starts_with("[You "));
        assert!(text[0].ends_with("hello there"));
        assert_eq!(text[1], "");
        assert!(text[2].starts_with("[AI "));
        assert!(text[2].ends_with("first"));
        assert_eq!(text[3].trim_start(), "second");
        assert!(text[3].starts_with(' '));
    }

    #[test]
    fn typing_indicator_follows_pending_user_message() {
        let messages = vec![Message::user("hi")];
        let lines = build_chat_lines(&messages, 80, true, 0);
        let last = line_text(lines.last().unwrap());
        assert!(last.starts_with("[AI] "));
    }

    #[test]
    fn empty_log_shows_hint() {
        let lines = build_chat_lines(&[], 80, false, 0);
        assert_eq!(lines.len(), 1);
        assert!(line_text(&lines[0]).contains("Start a conversation"));
    }
}
