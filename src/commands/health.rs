use crate::app::Runtime;
use crate::errors::CliError;
use crate::parse::response::extract_health;

pub async fn handle(runtime: &Runtime) -> Result<(), CliError> {
    let api = runtime.api_client()?;
    let res = api.health().await?;
    runtime.output.print_verbose(&format!(
        "url={} request_id={:?} elapsed_ms={}",
        api.base_url(),
        res.request_id,
        res.elapsed_ms
    ));

    if runtime.output.json {
        runtime.output.print_json(&res.json)?;
        return Ok(());
    }

    let health = extract_health(&res.json);
    runtime.output.print_human(&format!("status: {}", health.status));
    runtime.output.print_human(&format!(
        "active_sessions: {}",
        health
            .active_sessions
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    runtime.output.print_human(&format!(
        "timestamp: {}",
        health.timestamp.as_deref().unwrap_or("-")
    ));

    Ok(())
}
