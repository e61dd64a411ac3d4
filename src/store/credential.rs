use std::fmt;

use crate::errors::redact_secret;

pub const FORMAT_ERROR_TEXT: &str = "Invalid API Key format. Please check your key.";
pub const REJECTED_FALLBACK_TEXT: &str = "Failed to validate API key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Did not match the key pattern; no request was made.
    Format,
    /// The service looked at the key and said no.
    Rejected(String),
    /// The check itself failed (non-2xx, network).
    Transport(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Format => f.write_str(FORMAT_ERROR_TEXT),
            InvalidReason::Rejected(message) | InvalidReason::Transport(message) => {
                f.write_str(message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Validity {
    #[default]
    Unchecked,
    Valid,
    Invalid(InvalidReason),
}

#[derive(Clone, Default)]
pub struct Credential {
    pub(super) key: String,
    pub(super) validity: Validity,
    pub(super) validating: bool,
}

impl Credential {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    pub fn error(&self) -> Option<String> {
        match &self.validity {
            Validity::Invalid(reason) => Some(reason.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &redact_secret(&self.key))
            .field("validity", &self.validity)
            .field("validating", &self.validating)
            .finish()
    }
}

/// A network check to run for `credential`. The result must be handed back
/// with the same credential so it can be matched against the current one.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub credential: String,
}

impl fmt::Debug for ValidationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRequest")
            .field("credential", &redact_secret(&self.credential))
            .finish()
    }
}
