// Keyboard input for the TUI. Conversation changes go through the store;
// anything that needs the network is handed to crate::dispatch.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::widgets::ListState;
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::catalog::{CUSTOM_PERSONA, MODELS, PERSONAS};
use crate::dispatch::{EventSender, spawn_submission, spawn_validation};
use crate::errors::CliError;
use crate::tui::types::{App, Mode, TextPromptState, TuiMsg};

use super::async_ops::spawn_health_fetch;

pub fn handle_event(
    api: &ApiClient,
    tx: &mpsc::UnboundedSender<TuiMsg>,
    events: &EventSender,
    app: &mut App,
    event: Event,
) -> Result<(), CliError> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
            handle_key(api, tx, events, app, key)?;
        }
        _ => {}
    }
    Ok(())
}

pub fn handle_key(
    api: &ApiClient,
    tx: &mpsc::UnboundedSender<TuiMsg>,
    events: &EventSender,
    app: &mut App,
    key: KeyEvent,
) -> Result<(), CliError> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match app.mode {
        Mode::Help => {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::Enter | KeyCode::F(1) | KeyCode::Char('q')
            ) {
                app.mode = Mode::Chat;
            }
            return Ok(());
        }
        Mode::ConfirmClear => {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    app.store.clear();
                    app.scroll_from_bottom = 0;
                    app.status = "Conversation cleared.".to_string();
                    app.mode = Mode::Chat;
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    app.mode = Mode::Chat;
                }
                _ => {}
            }
            return Ok(());
        }
        Mode::ModelPicker => {
            match key.code {
                KeyCode::Esc => app.mode = Mode::Chat,
                KeyCode::Up => move_selection(&mut app.model_state, -1, MODELS.len()),
                KeyCode::Down => move_selection(&mut app.model_state, 1, MODELS.len()),
                KeyCode::Enter => {
                    if let Some(model) = app.model_state.selected().and_then(|i| MODELS.get(i)) {
                        app.store.set_model(model);
                        app.status = format!("Model: {}", model.name);
                        app.save_settings()?;
                    }
                    app.mode = Mode::Chat;
                }
                _ => {}
            }
            return Ok(());
        }
        Mode::PersonaPicker => {
            let len = PERSONAS.len() + 1;
            match key.code {
                KeyCode::Esc => app.mode = Mode::Chat,
                KeyCode::Up => move_selection(&mut app.persona_state, -1, len),
                KeyCode::Down => move_selection(&mut app.persona_state, 1, len),
                KeyCode::Enter => {
                    let name = app
                        .persona_state
                        .selected()
                        .and_then(|i| PERSONAS.get(i))
                        .map(|p| p.name)
                        .unwrap_or(CUSTOM_PERSONA);
                    if name == CUSTOM_PERSONA {
                        open_developer_editor(app);
                        return Ok(());
                    }
                    app.store.select_persona(name)?;
                    app.status = format!("Persona: {name}");
                    app.save_settings()?;
                    app.mode = Mode::Chat;
                }
                _ => {}
            }
            return Ok(());
        }
        Mode::KeyPrompt => {
            let Some(mut st) = app.text_prompt.take() else {
                app.mode = Mode::Chat;
                return Ok(());
            };
            let changed = match key.code {
                KeyCode::Esc | KeyCode::Enter => {
                    app.mode = Mode::Chat;
                    return Ok(());
                }
                KeyCode::Backspace => st.backspace(),
                KeyCode::Left => {
                    st.left();
                    false
                }
                KeyCode::Right => {
                    st.right();
                    false
                }
                KeyCode::Home => {
                    st.home();
                    false
                }
                KeyCode::End => {
                    st.end();
                    false
                }
                KeyCode::Char('u') if ctrl => {
                    st = TextPromptState::default();
                    true
                }
                KeyCode::Char(ch) if !ctrl => {
                    st.insert(ch);
                    true
                }
                _ => false,
            };
            let value = st.value();
            app.text_prompt = Some(st);
            if changed {
                update_credential(api, events, app, value)?;
            }
            return Ok(());
        }
        Mode::DeveloperEditor => {
            let Some(mut st) = app.text_prompt.take() else {
                app.mode = Mode::Chat;
                return Ok(());
            };
            match key.code {
                KeyCode::Esc => {
                    app.mode = Mode::Chat;
                    return Ok(());
                }
                KeyCode::Enter => {
                    app.store.set_developer_message(st.value().trim());
                    app.status = format!("Persona: {}", app.store.persona());
                    app.save_settings()?;
                    app.mode = Mode::Chat;
                    return Ok(());
                }
                KeyCode::Backspace => {
                    st.backspace();
                }
                KeyCode::Left => st.left(),
                KeyCode::Right => st.right(),
                KeyCode::Home => st.home(),
                KeyCode::End => st.end(),
                KeyCode::Char('u') if ctrl => st = TextPromptState::default(),
                KeyCode::Char(ch) if !ctrl => st.insert(ch),
                _ => {}
            }
            app.text_prompt = Some(st);
            return Ok(());
        }
        Mode::Chat => {}
    }

    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('c') if ctrl => app.should_quit = true,
        KeyCode::F(1) => app.mode = Mode::Help,
        KeyCode::F(2) => {
            let idx = MODELS
                .iter()
                .position(|m| m.value == app.store.model().value)
                .unwrap_or(0);
            app.model_state.select(Some(idx));
            app.mode = Mode::ModelPicker;
        }
        KeyCode::F(3) => {
            let current = app.store.persona();
            let idx = PERSONAS
                .iter()
                .position(|p| p.name == current)
                .unwrap_or(PERSONAS.len());
            app.persona_state.select(Some(idx));
            app.mode = Mode::PersonaPicker;
        }
        KeyCode::F(4) => {
            app.text_prompt = Some(TextPromptState::with_text(app.store.credential().key()));
            app.mode = Mode::KeyPrompt;
        }
        KeyCode::F(5) => open_developer_editor(app),
        KeyCode::Char('l') if ctrl => {
            if !app.store.messages().is_empty() || app.store.is_loading() {
                app.mode = Mode::ConfirmClear;
            }
        }
        KeyCode::Char('r') if ctrl => {
            app.status = "Checking service...".to_string();
            app.bg_tasks = app.bg_tasks.saturating_add(1);
            spawn_health_fetch(api.clone(), tx.clone());
        }
        KeyCode::PageUp => app.scroll_from_bottom = app.scroll_from_bottom.saturating_add(5),
        KeyCode::PageDown => app.scroll_from_bottom = app.scroll_from_bottom.saturating_sub(5),
        KeyCode::Enter => send_draft(api, events, app),
        KeyCode::Backspace => {
            app.input.backspace();
            sync_draft(app);
        }
        KeyCode::Left => app.input.left(),
        KeyCode::Right => app.input.right(),
        KeyCode::Home => app.input.home(),
        KeyCode::End => app.input.end(),
        KeyCode::Char(ch) if !ctrl => {
            app.input.insert(ch);
            sync_draft(app);
        }
        _ => {}
    }

    Ok(())
}

fn sync_draft(app: &mut App) {
    app.store.set_draft(app.input.value());
}

fn send_draft(api: &ApiClient, events: &EventSender, app: &mut App) {
    let text = app.store.draft().trim().to_string();
    if text.is_empty() {
        return;
    }
    if app.store.is_loading() {
        app.status = "Still waiting for the last reply.".to_string();
        return;
    }
    if !app.store.credential().is_valid() {
        app.status = match app.store.credential_error() {
            Some(reason) => format!("{reason} Press F4 to change it."),
            None if app.store.credential().is_validating() => {
                "Still checking the API key.".to_string()
            }
            None => "Set an API key first (F4).".to_string(),
        };
        return;
    }

    let Some(submission) = app.store.submit(&text) else {
        return;
    };
    app.input = TextPromptState::default();
    app.scroll_from_bottom = 0;
    app.spinner_step = 0;
    app.status = "Thinking...".to_string();
    app.bg_tasks = app.bg_tasks.saturating_add(1);
    spawn_submission(api.clone(), events.clone(), submission);
}

fn update_credential(
    api: &ApiClient,
    events: &EventSender,
    app: &mut App,
    value: String,
) -> Result<(), CliError> {
    let request = app.store.set_credential(value);
    app.status = match (&request, app.store.credential_error()) {
        (Some(_), _) => "Checking API key...".to_string(),
        (None, Some(reason)) => reason,
        (None, None) => "API key cleared.".to_string(),
    };
    if let Some(request) = request {
        app.bg_tasks = app.bg_tasks.saturating_add(1);
        spawn_validation(api.clone(), events.clone(), request);
    }
    app.save_settings()
}

fn open_developer_editor(app: &mut App) {
    app.text_prompt = Some(TextPromptState::with_text(app.store.developer_message()));
    app.mode = Mode::DeveloperEditor;
}

fn move_selection(state: &mut ListState, delta: isize, len: usize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let cur = state.selected().unwrap_or(0) as isize;
    let next = (cur + delta).clamp(0, len as isize - 1);
    state.select(Some(next as usize));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::config::Settings;
    use crate::store::{ConversationStore, StoreEvent};

    struct Harness {
        api: ApiClient,
        tx: mpsc::UnboundedSender<TuiMsg>,
        events: EventSender,
        app: App,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, _rx) = mpsc::unbounded_channel();
            let (events, _events_rx) = mpsc::unbounded_channel();
            let store = ConversationStore::new(
                catalog::default_model(),
                catalog::default_persona().prompt.to_string(),
            );
            Self {
                api: ApiClient::new("http://127.0.0.1:9".to_string(), 1000, 0, false).unwrap(),
                tx,
                events,
                app: App::new(store, Settings::default(), None, "http://127.0.0.1:9".into()),
            }
        }

        fn press(&mut self, code: KeyCode) {
            self.press_with(code, KeyModifiers::NONE);
        }

        fn press_with(&mut self, code: KeyCode, modifiers: KeyModifiers) {
            let key = KeyEvent::new(code, modifiers);
            handle_key(&self.api, &self.tx, &self.events, &mut self.app, key).unwrap();
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.press(KeyCode::Char(ch));
            }
        }
    }

    #[test]
    fn typing_updates_the_draft() {
        let mut h = Harness::new();
        h.type_text("hey");
        h.press(KeyCode::Backspace);
        assert_eq!(h.app.store.draft(), "he");
    }

    #[test]
    fn enter_without_key_does_not_submit() {
        let mut h = Harness::new();
        h.type_text("hello");
        h.press(KeyCode::Enter);
        assert!(h.app.store.messages().is_empty());
        assert_eq!(h.app.status, "Set an API key first (F4).");
        assert_eq!(h.app.input.value(), "hello");
    }

    #[test]
    fn malformed_key_is_rejected_while_typing() {
        let mut h = Harness::new();
        h.press(KeyCode::F(4));
        assert_eq!(h.app.mode, Mode::KeyPrompt);
        h.type_text("sk-nope");
        assert_eq!(h.app.store.credential().key(), "sk-nope");
        assert_eq!(
            h.app.store.credential_error().as_deref(),
            Some("Invalid API Key format. Please check your key.")
        );
        assert_eq!(h.app.bg_tasks, 0);
        assert_eq!(h.app.settings.api_key.as_deref(), Some("sk-nope"));

        h.press(KeyCode::Enter);
        assert_eq!(h.app.mode, Mode::Chat);
    }

    #[tokio::test]
    async fn well_formed_key_starts_a_check() {
        let mut h = Harness::new();
        h.press(KeyCode::F(4));
        h.type_text(&format!("sk-proj-{}", "z".repeat(156)));
        assert!(h.app.store.credential().is_validating());
        assert!(h.app.store.credential_error().is_none());
        assert_eq!(h.app.status, "Checking API key...");
    }

    #[test]
    fn clear_asks_first() {
        let mut h = Harness::new();
        let key = format!("sk-proj-{}", "a".repeat(156));
        let request = h.app.store.set_credential(key).unwrap();
        h.app.store.apply(StoreEvent::Validated {
            request,
            result: Ok(crate::api::KeyCheck {
                valid: true,
                message: None,
            }),
        });
        h.app.store.set_draft("hi");
        let submission = h.app.store.submit("hi").unwrap();
        h.app.store.apply(StoreEvent::StreamDone {
            epoch: submission.epoch,
            session_id: Some("s-1".to_string()),
        });
        assert_eq!(h.app.store.messages().len(), 2);

        h.press_with(KeyCode::Char('l'), KeyModifiers::CONTROL);
        assert_eq!(h.app.mode, Mode::ConfirmClear);
        h.press(KeyCode::Char('n'));
        assert_eq!(h.app.store.messages().len(), 2);

        h.press_with(KeyCode::Char('l'), KeyModifiers::CONTROL);
        h.press(KeyCode::Char('y'));
        assert!(h.app.store.messages().is_empty());
        assert!(h.app.store.session_id().is_none());
        assert_eq!(h.app.mode, Mode::Chat);
    }

    #[test]
    fn model_picker_applies_and_saves() {
        let mut h = Harness::new();
        h.press(KeyCode::F(2));
        h.press(KeyCode::Down);
        h.press(KeyCode::Enter);
        assert_eq!(h.app.store.model().value, MODELS[1].value);
        assert_eq!(h.app.settings.model.as_deref(), Some(MODELS[1].value));
        assert_eq!(h.app.mode, Mode::Chat);
    }

    #[test]
    fn persona_picker_sets_developer_message() {
        let mut h = Harness::new();
        h.press(KeyCode::F(3));
        h.press(KeyCode::Down);
        h.press(KeyCode::Enter);
        assert_eq!(h.app.store.persona(), PERSONAS[1].name);
        assert_eq!(h.app.store.developer_message(), PERSONAS[1].prompt);
    }

    #[test]
    fn custom_persona_opens_editor() {
        let mut h = Harness::new();
        h.press(KeyCode::F(3));
        for _ in 0..PERSONAS.len() {
            h.press(KeyCode::Down);
        }
        h.press(KeyCode::Enter);
        assert_eq!(h.app.mode, Mode::DeveloperEditor);

        h.press_with(KeyCode::Char('u'), KeyModifiers::CONTROL);
        h.type_text("Answer in haiku.");
        h.press(KeyCode::Enter);
        assert_eq!(h.app.store.developer_message(), "Answer in haiku.");
        assert_eq!(h.app.store.persona(), CUSTOM_PERSONA);
        assert_eq!(
            h.app.settings.developer_message.as_deref(),
            Some("Answer in haiku.")
        );
    }

    #[test]
    fn escape_quits_from_chat_only() {
        let mut h = Harness::new();
        h.press(KeyCode::F(1));
        h.press(KeyCode::Esc);
        assert!(!h.app.should_quit);
        h.press(KeyCode::Esc);
        assert!(h.app.should_quit);
    }
}
