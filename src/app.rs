use std::path::PathBuf;

use crate::api::ApiClient;
use crate::config::{self, Settings, resolve_api_key, resolve_api_url, save_settings};
use crate::errors::CliError;
use crate::output::OutputMode;
use crate::store::{ConversationStore, ValidationRequest};

#[derive(Debug, Clone)]
pub struct Runtime {
    pub output: OutputMode,
    pub settings: Settings,
    pub api_url_override: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Runtime {
    pub fn resolved_api_url(&self) -> Result<String, CliError> {
        resolve_api_url(&self.settings, self.api_url_override.as_deref())
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_api_key(&self.settings)
    }

    pub fn api_client(&self) -> Result<ApiClient, CliError> {
        ApiClient::new(
            self.resolved_api_url()?,
            self.timeout_ms,
            self.retries,
            self.output.debug,
        )
    }

    /// Builds the store from saved settings. The returned request, if any, is
    /// the check for the saved credential.
    pub fn new_store(&self) -> (ConversationStore, Option<ValidationRequest>) {
        let mut store = ConversationStore::new(
            self.settings.model_option(),
            self.settings.developer_message_or_default(),
        );
        let request = self
            .resolved_api_key()
            .and_then(|key| store.set_credential(key));
        (store, request)
    }

    /// Saves the store's configuration and credential.
    pub fn persist(&mut self, store: &ConversationStore) -> Result<PathBuf, CliError> {
        self.settings = persisted_settings(&self.settings, store);
        save_settings(&self.settings)
    }
}

/// `base` updated with what the store holds. A credential that came from the
/// environment is never written to disk.
pub fn persisted_settings(base: &Settings, store: &ConversationStore) -> Settings {
    let mut next = base.clone();
    next.model = Some(store.model().value.to_string());
    next.developer_message = Some(store.developer_message().to_string());
    if config::env_api_key().is_none() {
        let key = store.credential().key();
        next.api_key = (!key.is_empty()).then(|| key.to_string());
    }
    next
}
