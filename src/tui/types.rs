use std::path::PathBuf;
use std::time::Instant;

use ratatui::widgets::ListState;

use crate::api::ApiResponse;
use crate::app::persisted_settings;
use crate::config::{Settings, write_settings};
use crate::errors::CliError;
use crate::store::ConversationStore;

// ============================================================================
// UI mode enum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Chat,
    ModelPicker,
    PersonaPicker,
    KeyPrompt,
    DeveloperEditor,
    ConfirmClear,
    Help,
}

// ============================================================================
// Single-line editor used by the popups
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TextPromptState {
    pub input: Vec<char>,
    pub cursor: usize,
}

impl TextPromptState {
    pub fn with_text(text: &str) -> Self {
        let input = text.chars().collect::<Vec<_>>();
        let cursor = input.len();
        Self { input, cursor }
    }

    pub fn value(&self) -> String {
        self.input.iter().collect()
    }

    pub fn insert(&mut self, ch: char) {
        self.cursor = self.cursor.min(self.input.len());
        self.input.insert(self.cursor, ch);
        self.cursor += 1;
    }

    /// Returns false when there was nothing to delete.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 || self.cursor > self.input.len() {
            return false;
        }
        self.cursor -= 1;
        self.input.remove(self.cursor);
        true
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.input.len();
    }
}

// ============================================================================
// Main App state
// ============================================================================

#[derive(Debug)]
pub struct App {
    pub mode: Mode,
    pub should_quit: bool,

    pub api_url: String,
    pub settings: Settings,
    /// Where changes are written as they happen. `None` keeps them in memory.
    pub settings_path: Option<PathBuf>,

    pub store: ConversationStore,
    pub input: TextPromptState,
    pub text_prompt: Option<TextPromptState>,

    pub model_state: ListState,
    pub persona_state: ListState,

    pub status: String,
    pub health: Option<String>,
    pub bg_tasks: u32,
    pub spinner_step: u64,
    pub spinner_last: Instant,
    pub scroll_from_bottom: usize,
}

impl App {
    pub fn new(
        store: ConversationStore,
        settings: Settings,
        settings_path: Option<PathBuf>,
        api_url: String,
    ) -> Self {
        Self {
            mode: Mode::Chat,
            should_quit: false,
            api_url,
            settings,
            settings_path,
            store,
            input: TextPromptState::default(),
            text_prompt: None,
            model_state: ListState::default(),
            persona_state: ListState::default(),
            status: "Ready.".to_string(),
            health: None,
            bg_tasks: 0,
            spinner_step: 0,
            spinner_last: Instant::now(),
            scroll_from_bottom: 0,
        }
    }

    /// Writes model, developer message, and credential back to the settings file.
    pub fn save_settings(&mut self) -> Result<(), CliError> {
        self.settings = persisted_settings(&self.settings, &self.store);
        if let Some(path) = &self.settings_path {
            write_settings(path, &self.settings)?;
        }
        Ok(())
    }
}

// ============================================================================
// Async message enum
// ============================================================================

#[derive(Debug)]
pub enum TuiMsg {
    Health(Result<ApiResponse, CliError>),
}
