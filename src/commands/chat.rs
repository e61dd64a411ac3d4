use std::io::{self, Read};

use clap::Args;
use serde_json::json;
use tokio::sync::mpsc;

use crate::app::Runtime;
use crate::catalog;
use crate::dispatch::{run_validation, spawn_submission};
use crate::errors::CliError;
use crate::store::{ConversationStore, StoreEvent};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Prompt text
    pub prompt: Option<String>,
    /// Model for this message only. Examples: "gpt-4" or "GPT-4.1 Mini"
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,
    /// Persona preset for this message only
    #[arg(short = 'p', long = "persona")]
    pub persona: Option<String>,
    /// Continue a service-side session from an earlier run
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,
    /// Read prompt from stdin
    #[arg(long)]
    pub stdin: bool,
}

pub async fn handle(runtime: &Runtime, args: ChatArgs) -> Result<(), CliError> {
    let prompt = resolve_prompt(&args)?;
    let api = runtime.api_client()?;
    let (mut store, validation) = runtime.new_store();

    apply_overrides(&mut store, &args)?;

    if store.credential().key().is_empty() {
        return Err(CliError::Auth(
            "No API key configured. Run `chatdeck key set` first.".to_string(),
        ));
    }
    if let Some(request) = validation {
        store.apply(run_validation(&api, request).await);
    }
    if let Some(reason) = store.credential_error() {
        return Err(CliError::Auth(reason));
    }

    store.set_draft(prompt.clone());
    let submission = store.submit(&prompt).ok_or_else(|| {
        CliError::Generic("Message could not be sent; the API key is not validated.".to_string())
    })?;
    runtime.output.print_verbose(&format!(
        "model={} session={}",
        submission.request.model,
        submission.request.session_id.as_deref().unwrap_or("-")
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_submission(api, tx, submission);

    let mut shown = 0usize;
    let mut failure = None;
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        if let StoreEvent::StreamFailed { error, .. } = &event {
            failure = Some(error.clone());
        }
        let is_chunk = matches!(event, StoreEvent::StreamChunk { .. });
        store.apply(event);

        if is_chunk {
            let reply = last_reply(&store);
            runtime.output.print_fragment(reply.get(shown..).unwrap_or(""))?;
            shown = reply.len();
        }
        if terminal {
            break;
        }
    }

    if let Some(error) = failure {
        if shown > 0 {
            runtime.output.print_human("");
        }
        return Err(CliError::Network(error));
    }

    if runtime.output.json {
        runtime.output.print_json(&json!({
            "reply": last_reply(&store),
            "session_id": store.session_id(),
            "model": store.model().value,
        }))?;
    } else {
        runtime.output.print_human("");
        runtime.output.print_verbose(&format!(
            "session={}",
            store.session_id().unwrap_or("-")
        ));
    }
    Ok(())
}

fn last_reply(store: &ConversationStore) -> &str {
    store
        .messages()
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn apply_overrides(store: &mut ConversationStore, args: &ChatArgs) -> Result<(), CliError> {
    if let Some(selector) = args.model.as_deref() {
        let model = catalog::find_model(selector).ok_or_else(|| {
            CliError::Usage(format!(
                "Unknown model '{selector}'. Run `chatdeck config models` to list them."
            ))
        })?;
        store.set_model(model);
    }
    if let Some(persona) = args.persona.as_deref() {
        store.select_persona(persona)?;
    }
    if let Some(session) = args.session.as_deref() {
        store.resume_session(session)?;
    }
    Ok(())
}

fn resolve_prompt(args: &ChatArgs) -> Result<String, CliError> {
    if args.stdin {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| CliError::Generic(format!("Failed reading stdin: {e}")))?;
        let trimmed = input.trim().to_string();
        if trimmed.is_empty() {
            return Err(CliError::Usage(
                "No prompt provided via stdin. Pipe text or pass a prompt argument.".to_string(),
            ));
        }
        return Ok(trimmed);
    }

    match &args.prompt {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(CliError::Usage(
            "Missing prompt. Use `chatdeck chat \"...\"` or pass `--stdin`.".to_string(),
        )),
    }
}
