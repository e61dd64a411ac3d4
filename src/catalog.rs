//! Fixed option sets offered by the client: models, personas, endpoints and
//! the credential shape accepted before anything touches the network.

use std::sync::LazyLock;

use regex::Regex;

pub const TEST_KEY_PATH: &str = "/api/test-key";
pub const CHAT_PATH: &str = "/api/chat";
pub const HEALTH_PATH: &str = "/api/health";
pub const SESSIONS_PATH: &str = "/api/sessions";

pub const SESSION_HEADER: &str = "x-session-id";
pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";

pub const CUSTOM_PERSONA: &str = "Custom";

pub const SUBMISSION_FAILED_TEXT: &str = "Sorry, there was an error processing your request.";

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sk-proj-[A-Za-z0-9\-_]{156}$").expect("credential pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOption {
    pub value: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub name: &'static str,
    pub prompt: &'static str,
}

pub const MODELS: &[ModelOption] = &[
    ModelOption {
        value: "gpt-4.1-mini",
        name: "GPT-4.1 Mini",
        description: "Fastest and most affordable model, great for simple tasks and quick chats.",
    },
    ModelOption {
        value: "gpt-4",
        name: "GPT-4",
        description: "Powerful and capable model, ideal for complex reasoning and multi-step tasks.",
    },
    ModelOption {
        value: "gpt-3.5-turbo",
        name: "GPT-3.5 Turbo",
        description: "A solid balance of speed, performance, and cost-effectiveness.",
    },
];

pub const PERSONAS: &[Persona] = &[
    Persona {
        name: "Default",
        prompt: "You are a helpful AI assistant.",
    },
    Persona {
        name: "Sarcastic Bot",
        prompt: "You are a sarcastic bot. You provide witty, eye-rolling responses to every user request, but still begrudgingly provide the correct answer.",
    },
    Persona {
        name: "ELI5 Explainer",
        prompt: "You are an expert explainer who can break down complex topics into simple, easy-to-understand concepts, as if you were explaining it to a 5-year-old.",
    },
];

pub fn default_model() -> &'static ModelOption {
    &MODELS[0]
}

pub fn default_persona() -> &'static Persona {
    &PERSONAS[0]
}

pub fn find_model(value: &str) -> Option<&'static ModelOption> {
    let needle = value.trim();
    MODELS
        .iter()
        .find(|m| m.value == needle || m.name.eq_ignore_ascii_case(needle))
}

pub fn find_persona(name: &str) -> Option<&'static Persona> {
    let needle = name.trim();
    PERSONAS.iter().find(|p| p.name.eq_ignore_ascii_case(needle))
}

/// Name of the preset whose prompt matches `developer_message` exactly, or `Custom`.
pub fn persona_for(developer_message: &str) -> &'static str {
    PERSONAS
        .iter()
        .find(|p| p.prompt == developer_message)
        .map(|p| p.name)
        .unwrap_or(CUSTOM_PERSONA)
}

pub fn is_valid_key_format(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}
