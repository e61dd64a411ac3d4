use clap::Subcommand;
use serde_json::json;

use crate::app::Runtime;
use crate::config::{self, save_settings};
use crate::dispatch::run_validation;
use crate::errors::{CliError, redact_secret};
use crate::store::{ConversationStore, Validity};

#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    /// Store an API key (prompts without echo when omitted) and check it
    Set { key: Option<String> },
    /// Check the stored API key against the service
    Check,
    /// Print the stored API key, masked unless --reveal
    Show {
        #[arg(long)]
        reveal: bool,
    },
    /// Forget the stored API key
    Clear,
}

pub async fn handle(runtime: &mut Runtime, command: KeyCommand) -> Result<(), CliError> {
    match command {
        KeyCommand::Set { key } => set(runtime, key).await,
        KeyCommand::Check => check(runtime).await,
        KeyCommand::Show { reveal } => show(runtime, reveal),
        KeyCommand::Clear => clear(runtime),
    }
}

async fn set(runtime: &mut Runtime, key: Option<String>) -> Result<(), CliError> {
    let key = match key {
        Some(k) => k,
        None if runtime.output.json || is_ci() => {
            return Err(CliError::Usage(
                "Pass the key as an argument in non-interactive mode.".to_string(),
            ));
        }
        None => rpassword::prompt_password("API key: ")
            .map_err(|e| CliError::Generic(format!("Failed reading key: {e}")))?,
    };
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(CliError::Usage("API key cannot be empty.".to_string()));
    }
    if config::env_api_key().is_some() {
        runtime.output.print_stderr(&format!(
            "Note: {} is set and takes precedence over the saved key.",
            config::API_KEY_ENV
        ));
    }

    let (mut store, _) = runtime.new_store();
    let request = store.set_credential(key.clone());

    // Saved as typed, like the settings form does; validity is reported separately.
    runtime.settings.api_key = Some(key);
    save_settings(&runtime.settings)?;

    if let Some(request) = request {
        let api = runtime.api_client()?;
        store.apply(run_validation(&api, request).await);
    }
    report(runtime, &store)
}

async fn check(runtime: &Runtime) -> Result<(), CliError> {
    let (mut store, request) = runtime.new_store();
    if store.credential().key().is_empty() {
        return Err(CliError::Auth(
            "No API key configured. Run `chatdeck key set` first.".to_string(),
        ));
    }
    if let Some(request) = request {
        let api = runtime.api_client()?;
        store.apply(run_validation(&api, request).await);
    }
    report(runtime, &store)
}

fn report(runtime: &Runtime, store: &ConversationStore) -> Result<(), CliError> {
    let credential = store.credential();
    if runtime.output.json {
        runtime.output.print_json(&json!({
            "valid": credential.is_valid(),
            "message": credential.error(),
        }))?;
    }

    match credential.validity() {
        Validity::Valid => {
            runtime.output.print_human("API key is valid.");
            Ok(())
        }
        Validity::Invalid(reason) => Err(CliError::Auth(reason.to_string())),
        Validity::Unchecked => Err(CliError::Generic(
            "API key could not be checked.".to_string(),
        )),
    }
}

fn show(runtime: &Runtime, reveal: bool) -> Result<(), CliError> {
    let key = runtime.resolved_api_key();
    let display = key
        .as_deref()
        .map(|k| if reveal { k.to_string() } else { redact_secret(k) });

    if runtime.output.json {
        runtime.output.print_json(&json!({
            "key": display,
            "fromEnv": config::env_api_key().is_some(),
        }))?;
    } else if let Some(v) = display {
        runtime.output.print_human(&v);
    } else {
        runtime.output.print_human("(not set)");
    }
    Ok(())
}

fn clear(runtime: &mut Runtime) -> Result<(), CliError> {
    runtime.settings.api_key = None;
    save_settings(&runtime.settings)?;

    if runtime.output.json {
        runtime.output.print_json(&json!({ "ok": true }))?;
    } else {
        runtime.output.print_human("API key removed.");
    }
    Ok(())
}

fn is_ci() -> bool {
    std::env::var("CI")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
