use clap::Subcommand;

use crate::app::Runtime;
use crate::errors::CliError;
use crate::parse::response::{SessionSummary, extract_session};

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// Open a new service-side conversation
    Create {
        /// Developer message for the new session (defaults to the saved one)
        #[arg(long = "developer-message")]
        developer_message: Option<String>,
    },
    /// Show what the service knows about a session
    Info { id: String },
    /// Forget a session on the service
    Delete { id: String },
}

pub async fn handle(runtime: &Runtime, command: SessionsCommand) -> Result<(), CliError> {
    match command {
        SessionsCommand::Create { developer_message } => create(runtime, developer_message).await,
        SessionsCommand::Info { id } => info(runtime, &id).await,
        SessionsCommand::Delete { id } => delete(runtime, &id).await,
    }
}

async fn create(runtime: &Runtime, developer_message: Option<String>) -> Result<(), CliError> {
    let api = runtime.api_client()?;
    let developer_message =
        developer_message.unwrap_or_else(|| runtime.settings.developer_message_or_default());
    let res = api.create_session(&developer_message).await?;

    if runtime.output.json {
        runtime.output.print_json(&res.json)?;
        return Ok(());
    }

    let id = res
        .json
        .get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CliError::Server("Missing session_id in response".to_string()))?;
    runtime.output.print_human(id);
    runtime
        .output
        .print_stderr(&format!("Resume it with `chatdeck chat --session {id} \"...\"`."));
    Ok(())
}

async fn info(runtime: &Runtime, id: &str) -> Result<(), CliError> {
    let api = runtime.api_client()?;
    let res = api.session_info(id).await?;

    if runtime.output.json {
        runtime.output.print_json(&res.json)?;
        return Ok(());
    }

    let summary = extract_session(&res.json)
        .ok_or_else(|| CliError::Server("Missing session_id in response".to_string()))?;
    print_summary(runtime, &summary);
    Ok(())
}

async fn delete(runtime: &Runtime, id: &str) -> Result<(), CliError> {
    let api = runtime.api_client()?;
    let res = api.delete_session(id).await?;

    if runtime.output.json {
        runtime.output.print_json(&res.json)?;
    } else {
        runtime.output.print_human(&format!("Deleted session {id}."));
    }
    Ok(())
}

fn print_summary(runtime: &Runtime, summary: &SessionSummary) {
    let or_dash = |v: Option<&str>| v.unwrap_or("-").to_string();
    runtime
        .output
        .print_human(&format!("session_id: {}", summary.session_id));
    runtime.output.print_human(&format!(
        "messages: {}",
        summary
            .message_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    runtime.output.print_human(&format!(
        "created_at: {}",
        or_dash(summary.created_at.as_deref())
    ));
    runtime.output.print_human(&format!(
        "last_updated: {}",
        or_dash(summary.last_updated.as_deref())
    ));
    runtime.output.print_human(&format!(
        "developer_message: {}",
        or_dash(summary.developer_message.as_deref())
    ));
}
