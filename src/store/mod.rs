//! The conversation store: one owned value holding the message log, the
//! draft, the credential and its validity, model and developer message, and
//! the service session token.
//!
//! The store never performs I/O. Operations that need the network hand back a
//! ticket ([`ValidationRequest`], [`Submission`]); whoever runs the ticket
//! reports the outcome through [`ConversationStore::apply`]. Every outcome is
//! tagged with what it was issued for (the credential text, or the epoch of
//! the conversation) and is dropped when that no longer matches.

mod credential;
mod message;

pub use credential::{Credential, InvalidReason, ValidationRequest, Validity};
pub use message::{Message, Role};

use crate::api::{ChatRequest, KeyCheck};
use crate::catalog::{self, CUSTOM_PERSONA, ModelOption, SUBMISSION_FAILED_TEXT};
use crate::errors::CliError;

/// An accepted submission, ready to be sent.
#[derive(Debug)]
pub struct Submission {
    pub epoch: u64,
    pub request: ChatRequest,
}

/// Outcomes of network work, fed back into the store.
#[derive(Debug)]
pub enum StoreEvent {
    Validated {
        request: ValidationRequest,
        result: Result<KeyCheck, CliError>,
    },
    /// `content` is everything decoded so far for this reply, not a delta.
    StreamChunk { epoch: u64, content: String },
    StreamDone {
        epoch: u64,
        session_id: Option<String>,
    },
    StreamFailed { epoch: u64, error: String },
}

impl StoreEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StoreEvent::StreamDone { .. } | StoreEvent::StreamFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTurn {
    epoch: u64,
    reply_started: bool,
}

#[derive(Debug)]
pub struct ConversationStore {
    messages: Vec<Message>,
    draft: String,
    credential: Credential,
    model: &'static ModelOption,
    developer_message: String,
    session_id: Option<String>,
    epoch: u64,
    pending: Option<PendingTurn>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(
            catalog::default_model(),
            catalog::default_persona().prompt.to_string(),
        )
    }
}

impl ConversationStore {
    pub fn new(model: &'static ModelOption, developer_message: String) -> Self {
        Self {
            messages: Vec::new(),
            draft: String::new(),
            credential: Credential::default(),
            model,
            developer_message,
            session_id: None,
            epoch: 0,
            pending: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn credential_error(&self) -> Option<String> {
        self.credential.error()
    }

    pub fn model(&self) -> &'static ModelOption {
        self.model
    }

    pub fn developer_message(&self) -> &str {
        &self.developer_message
    }

    pub fn persona(&self) -> &'static str {
        catalog::persona_for(&self.developer_message)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Replaces the credential and recomputes its validity from scratch.
    ///
    /// Returns the network check to run, if any. Empty text and text that
    /// fails the local format check resolve synchronously.
    pub fn set_credential(&mut self, text: impl Into<String>) -> Option<ValidationRequest> {
        self.credential.key = text.into();
        if self.credential.key.is_empty() {
            self.credential.validity = Validity::Unchecked;
            self.credential.validating = false;
            return None;
        }
        self.validate()
    }

    /// Re-checks the current credential.
    pub fn validate(&mut self) -> Option<ValidationRequest> {
        if !catalog::is_valid_key_format(&self.credential.key) {
            self.credential.validity = Validity::Invalid(InvalidReason::Format);
            self.credential.validating = false;
            return None;
        }

        self.credential.validity = Validity::Unchecked;
        self.credential.validating = true;
        Some(ValidationRequest {
            credential: self.credential.key.clone(),
        })
    }

    pub fn set_model(&mut self, model: &'static ModelOption) {
        self.model = model;
    }

    pub fn set_developer_message(&mut self, text: impl Into<String>) {
        self.developer_message = text.into();
    }

    /// Applies a named preset. `Custom` keeps the current developer message.
    pub fn select_persona(&mut self, name: &str) -> Result<(), CliError> {
        if name.trim().eq_ignore_ascii_case(CUSTOM_PERSONA) {
            return Ok(());
        }
        let persona = catalog::find_persona(name)
            .ok_or_else(|| CliError::Usage(format!("Unknown persona '{name}'.")))?;
        self.developer_message = persona.prompt.to_string();
        Ok(())
    }

    /// Continues a service-side conversation from a previous run. Only allowed
    /// before anything has been said in this one.
    pub fn resume_session(&mut self, session_id: impl Into<String>) -> Result<(), CliError> {
        if !self.messages.is_empty() || self.pending.is_some() {
            return Err(CliError::Usage(
                "A session can only be resumed before the first message.".to_string(),
            ));
        }
        let id = session_id.into();
        self.session_id = Some(id).filter(|s| !s.trim().is_empty());
        Ok(())
    }

    pub fn can_submit(&self) -> bool {
        !self.draft.trim().is_empty()
            && self.credential.is_valid()
            && self.credential_error().is_none()
            && self.pending.is_none()
    }

    /// Starts a turn. No-op (returns `None`) unless [`can_submit`] holds now
    /// and `text` has content.
    ///
    /// [`can_submit`]: ConversationStore::can_submit
    pub fn submit(&mut self, text: &str) -> Option<Submission> {
        if !self.can_submit() || text.trim().is_empty() {
            return None;
        }

        self.messages.push(Message::user(text));
        self.draft.clear();
        self.pending = Some(PendingTurn {
            epoch: self.epoch,
            reply_started: false,
        });

        Some(Submission {
            epoch: self.epoch,
            request: ChatRequest {
                user_message: text.to_string(),
                developer_message: self.developer_message.clone(),
                api_key: self.credential.key.clone(),
                session_id: self.session_id.clone(),
                model: self.model.value.to_string(),
            },
        })
    }

    /// Starts a new conversation. Allowed mid-stream; the running stream keeps
    /// going but nothing it produces lands in the new log.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_id = None;
        self.epoch = self.epoch.wrapping_add(1);
        tracing::debug!(epoch = self.epoch, "conversation cleared");
    }

    pub fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Validated { request, result } => self.apply_validation(request, result),
            StoreEvent::StreamChunk { epoch, content } => self.apply_chunk(epoch, content),
            StoreEvent::StreamDone { epoch, session_id } => self.apply_done(epoch, session_id),
            StoreEvent::StreamFailed { epoch, error } => self.apply_failure(epoch, error),
        }
    }

    fn apply_validation(&mut self, request: ValidationRequest, result: Result<KeyCheck, CliError>) {
        if request.credential != self.credential.key {
            tracing::debug!("discarding validation result for a superseded credential");
            return;
        }

        self.credential.validating = false;
        self.credential.validity = match result {
            Ok(check) if check.valid => {
                if let Some(message) = check.message {
                    tracing::debug!(%message, "credential accepted");
                }
                Validity::Valid
            }
            Ok(check) => Validity::Invalid(InvalidReason::Rejected(
                check
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| credential::REJECTED_FALLBACK_TEXT.to_string()),
            )),
            Err(err) => Validity::Invalid(InvalidReason::Transport(err.to_string())),
        };
    }

    fn apply_chunk(&mut self, epoch: u64, content: String) {
        let Some(pending) = self.pending.as_mut() else {
            tracing::debug!(epoch, "chunk with no submission in flight");
            return;
        };
        if pending.epoch != epoch || epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "dropping chunk from a cleared conversation");
            return;
        }

        if !pending.reply_started {
            self.messages.push(Message::assistant(String::new()));
            pending.reply_started = true;
        }
        if let Some(last) = self.messages.last_mut() {
            last.content = content;
        }
    }

    /// Ends the pending turn if `epoch` is its epoch, reporting whether its
    /// reply had started and whether the turn still belongs to the current log.
    fn finish_turn(&mut self, epoch: u64) -> Option<(bool, bool)> {
        if self.pending.map(|p| p.epoch) != Some(epoch) {
            tracing::debug!(epoch, "terminal event for an unknown submission");
            return None;
        }
        let reply_started = self.pending.take().is_some_and(|p| p.reply_started);
        Some((reply_started, epoch == self.epoch))
    }

    fn apply_done(&mut self, epoch: u64, session_id: Option<String>) {
        let Some((reply_started, current)) = self.finish_turn(epoch) else {
            return;
        };
        if !current {
            return;
        }

        if !reply_started {
            self.messages.push(Message::assistant(String::new()));
        }
        if let Some(id) = session_id.filter(|s| !s.is_empty()) {
            if self.session_id.as_deref() != Some(id.as_str()) {
                tracing::debug!(session = %id, "adopting session from service");
                self.session_id = Some(id);
            }
        }
    }

    fn apply_failure(&mut self, epoch: u64, error: String) {
        let Some((reply_started, current)) = self.finish_turn(epoch) else {
            return;
        };
        tracing::warn!(%error, "submission failed");
        if !current {
            return;
        }

        if reply_started {
            self.messages.pop();
        }
        self.messages.push(Message::assistant(SUBMISSION_FAILED_TEXT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_key() -> String {
        format!("sk-proj-{}", "a".repeat(156))
    }

    fn other_valid_key() -> String {
        format!("sk-proj-{}", "b".repeat(156))
    }

    fn accepted() -> Result<KeyCheck, CliError> {
        Ok(KeyCheck {
            valid: true,
            message: None,
        })
    }

    fn ready_store() -> ConversationStore {
        let mut store = ConversationStore::default();
        let request = store.set_credential(valid_key()).unwrap();
        store.apply(StoreEvent::Validated {
            request,
            result: accepted(),
        });
        store
    }

    fn start_turn(store: &mut ConversationStore, text: &str) -> Submission {
        store.set_draft(text);
        store.submit(text).unwrap()
    }

    #[test]
    fn malformed_credential_is_rejected_locally() {
        let mut store = ConversationStore::default();
        let wrong_length = format!("sk-proj-{}", "x".repeat(160));
        assert!(store.set_credential(wrong_length).is_none());
        assert_eq!(
            store.credential().validity(),
            &Validity::Invalid(InvalidReason::Format)
        );
        assert!(!store.credential().is_validating());
        assert_eq!(
            store.credential_error().as_deref(),
            Some("Invalid API Key format. Please check your key.")
        );
    }

    #[test]
    fn empty_credential_resets_without_request() {
        let mut store = ready_store();
        assert!(store.set_credential("").is_none());
        assert_eq!(store.credential().validity(), &Validity::Unchecked);
        assert!(!store.credential().is_validating());
        assert!(store.credential_error().is_none());
    }

    #[test]
    fn well_formed_credential_needs_a_check() {
        let mut store = ConversationStore::default();
        let request = store.set_credential(valid_key()).unwrap();
        assert_eq!(request.credential, valid_key());
        assert!(store.credential().is_validating());
        assert_eq!(store.credential().validity(), &Validity::Unchecked);

        store.apply(StoreEvent::Validated {
            request,
            result: accepted(),
        });
        assert!(store.credential().is_valid());
        assert!(!store.credential().is_validating());
        assert!(store.credential_error().is_none());
    }

    #[test]
    fn stale_validation_never_overwrites_newer_credential() {
        let mut store = ConversationStore::default();
        let first = store.set_credential(valid_key()).unwrap();
        let second = store.set_credential(other_valid_key()).unwrap();

        // newer one resolves first, older one arrives late with a bad verdict
        store.apply(StoreEvent::Validated {
            request: second,
            result: accepted(),
        });
        store.apply(StoreEvent::Validated {
            request: first,
            result: Ok(KeyCheck {
                valid: false,
                message: Some("Authentication failed.".to_string()),
            }),
        });
        assert!(store.credential().is_valid());
        assert_eq!(store.credential().key(), other_valid_key());
    }

    #[test]
    fn stale_validation_arriving_first_keeps_check_pending() {
        let mut store = ConversationStore::default();
        let first = store.set_credential(valid_key()).unwrap();
        let second = store.set_credential(other_valid_key()).unwrap();

        store.apply(StoreEvent::Validated {
            request: first,
            result: accepted(),
        });
        assert!(store.credential().is_validating());
        assert_eq!(store.credential().validity(), &Validity::Unchecked);

        store.apply(StoreEvent::Validated {
            request: second,
            result: Err(CliError::Network("Network request failed: refused".to_string())),
        });
        assert_eq!(
            store.credential().validity(),
            &Validity::Invalid(InvalidReason::Transport(
                "Network request failed: refused".to_string()
            ))
        );
    }

    #[test]
    fn rejection_without_message_uses_fallback() {
        let mut store = ConversationStore::default();
        let request = store.set_credential(valid_key()).unwrap();
        store.apply(StoreEvent::Validated {
            request,
            result: Ok(KeyCheck {
                valid: false,
                message: None,
            }),
        });
        assert_eq!(
            store.credential_error().as_deref(),
            Some("Failed to validate API key")
        );
    }

    #[test]
    fn can_submit_requires_text_valid_key_and_idle() {
        let mut store = ConversationStore::default();
        store.set_draft("hello");
        assert!(!store.can_submit(), "unchecked credential");

        let mut store = ready_store();
        store.set_draft("   \n");
        assert!(!store.can_submit(), "whitespace draft");
        store.set_draft("hello");
        assert!(store.can_submit());

        store.set_credential("sk-proj-short");
        assert!(!store.can_submit(), "invalid credential");

        let mut store = ready_store();
        start_turn(&mut store, "first");
        store.set_draft("second");
        assert!(!store.can_submit(), "reply still streaming");
    }

    #[test]
    fn submit_rechecks_preconditions() {
        let mut store = ConversationStore::default();
        store.set_draft("hello");
        assert!(store.submit("hello").is_none());
        assert!(store.messages().is_empty());
        assert_eq!(store.draft(), "hello");

        let mut store = ready_store();
        store.set_draft("hello");
        assert!(store.submit("  ").is_none());
        assert!(!store.is_loading());
    }

    #[test]
    fn streamed_turn_grows_one_reply() {
        let mut store = ready_store();
        let submission = start_turn(&mut store, "hello");
        assert_eq!(store.draft(), "");
        assert!(store.is_loading());
        assert_eq!(store.messages().len(), 1);
        assert_eq!(submission.request.user_message, "hello");
        assert_eq!(submission.request.session_id, None);
        assert_eq!(submission.request.model, "gpt-4.1-mini");
        assert_eq!(
            submission.request.developer_message,
            "You are a helpful AI assistant."
        );

        let epoch = submission.epoch;
        store.apply(StoreEvent::StreamChunk {
            epoch,
            content: "Hi".to_string(),
        });
        store.apply(StoreEvent::StreamChunk {
            epoch,
            content: "Hi there".to_string(),
        });
        store.apply(StoreEvent::StreamDone {
            epoch,
            session_id: Some("abc123".to_string()),
        });

        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(store.session_id(), Some("abc123"));
        assert!(!store.is_loading());

        let next = start_turn(&mut store, "again");
        assert_eq!(next.request.session_id.as_deref(), Some("abc123"));
        store.apply(StoreEvent::StreamDone {
            epoch: next.epoch,
            session_id: None,
        });
        assert_eq!(store.session_id(), Some("abc123"));
        assert_eq!(store.messages().len(), 4);
    }

    #[test]
    fn silent_reply_still_adds_assistant_message() {
        let mut store = ready_store();
        let submission = start_turn(&mut store, "hello");
        store.apply(StoreEvent::StreamDone {
            epoch: submission.epoch,
            session_id: None,
        });
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[1].content, "");
    }

    #[test]
    fn failure_leaves_single_synthetic_reply() {
        let mut store = ready_store();
        let submission = start_turn(&mut store, "hello");
        store.apply(StoreEvent::StreamChunk {
            epoch: submission.epoch,
            content: "Partial ans".to_string(),
        });
        store.apply(StoreEvent::StreamFailed {
            epoch: submission.epoch,
            error: "connection reset".to_string(),
        });

        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, SUBMISSION_FAILED_TEXT);
        assert!(!store.is_loading());

        store.set_draft("retry");
        assert!(store.can_submit());
    }

    #[test]
    fn clear_mid_stream_drops_late_chunks() {
        let mut store = ready_store();
        let done = start_turn(&mut store, "first");
        store.apply(StoreEvent::StreamDone {
            epoch: done.epoch,
            session_id: Some("abc123".to_string()),
        });

        let submission = start_turn(&mut store, "second");
        store.apply(StoreEvent::StreamChunk {
            epoch: submission.epoch,
            content: "Hal".to_string(),
        });
        store.clear();
        assert!(store.messages().is_empty());
        assert_eq!(store.session_id(), None);

        store.apply(StoreEvent::StreamChunk {
            epoch: submission.epoch,
            content: "Halfway".to_string(),
        });
        store.apply(StoreEvent::StreamDone {
            epoch: submission.epoch,
            session_id: Some("abc123".to_string()),
        });
        assert!(store.messages().is_empty());
        assert_eq!(store.session_id(), None);
        assert!(!store.is_loading());
    }

    #[test]
    fn clear_keeps_configuration() {
        let mut store = ready_store();
        store.set_model(catalog::find_model("gpt-4").unwrap());
        store.select_persona("Sarcastic Bot").unwrap();
        store.clear();
        assert_eq!(store.model().value, "gpt-4");
        assert_eq!(store.persona(), "Sarcastic Bot");
        assert!(store.credential().is_valid());
    }

    #[test]
    fn custom_persona_keeps_developer_message() {
        let mut store = ConversationStore::default();
        store.set_developer_message("Answer in haiku.");
        assert_eq!(store.persona(), CUSTOM_PERSONA);
        store.select_persona("Custom").unwrap();
        assert_eq!(store.developer_message(), "Answer in haiku.");

        store.select_persona("ELI5 Explainer").unwrap();
        assert_eq!(store.persona(), "ELI5 Explainer");
        assert!(store.select_persona("Pirate").is_err());
    }

    #[test]
    fn resume_session_only_before_first_message() {
        let mut store = ready_store();
        store.resume_session("abc123").unwrap();
        let submission = start_turn(&mut store, "hello");
        assert_eq!(submission.request.session_id.as_deref(), Some("abc123"));
        assert!(store.resume_session("zzz").is_err());
    }
}
