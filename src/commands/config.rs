use clap::{Subcommand, ValueEnum};
use serde_json::json;

use crate::app::Runtime;
use crate::catalog::{self, CUSTOM_PERSONA, MODELS, PERSONAS};
use crate::config::{Settings, config_path, save_settings, validate_url};
use crate::errors::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Read a setting
    Get { key: ConfigKey },
    /// Change a setting
    Set { key: ConfigKey, value: String },
    /// List the models that can be selected
    Models,
    /// List the persona presets
    Personas,
    /// Print the settings file location
    Path,
    /// Forget every saved setting, including the API key
    Reset,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigKey {
    #[value(name = "apiUrl")]
    ApiUrl,
    #[value(name = "model")]
    Model,
    #[value(name = "developerMessage")]
    DeveloperMessage,
    #[value(name = "persona")]
    Persona,
}

impl ConfigKey {
    fn name(&self) -> &'static str {
        match self {
            ConfigKey::ApiUrl => "apiUrl",
            ConfigKey::Model => "model",
            ConfigKey::DeveloperMessage => "developerMessage",
            ConfigKey::Persona => "persona",
        }
    }
}

pub async fn handle(runtime: &mut Runtime, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Get { key } => get(runtime, key),
        ConfigCommand::Set { key, value } => set(runtime, key, value),
        ConfigCommand::Models => models(runtime),
        ConfigCommand::Personas => personas(runtime),
        ConfigCommand::Path => path(runtime),
        ConfigCommand::Reset => reset(runtime),
    }
}

fn get(runtime: &Runtime, key: ConfigKey) -> Result<(), CliError> {
    let (store, _) = runtime.new_store();
    let value = match key {
        ConfigKey::ApiUrl => runtime.resolved_api_url()?,
        ConfigKey::Model => store.model().value.to_string(),
        ConfigKey::DeveloperMessage => store.developer_message().to_string(),
        ConfigKey::Persona => store.persona().to_string(),
    };

    if runtime.output.json {
        runtime
            .output
            .print_json(&json!({ "key": key.name(), "value": value }))?;
    } else {
        runtime.output.print_human(&value);
    }
    Ok(())
}

fn set(runtime: &mut Runtime, key: ConfigKey, value: String) -> Result<(), CliError> {
    if let ConfigKey::ApiUrl = key {
        validate_url(value.trim())?;
        runtime.settings.api_url = Some(value.trim().to_string());
        save_settings(&runtime.settings)?;
        return confirm(runtime);
    }

    let (mut store, _) = runtime.new_store();
    match key {
        ConfigKey::Model => {
            let model = catalog::find_model(&value).ok_or_else(|| {
                CliError::Usage(format!(
                    "Unknown model '{value}'. Run `chatdeck config models` to list them."
                ))
            })?;
            store.set_model(model);
        }
        ConfigKey::DeveloperMessage => store.set_developer_message(value),
        ConfigKey::Persona => store.select_persona(&value)?,
        ConfigKey::ApiUrl => {}
    }

    runtime.persist(&store)?;
    confirm(runtime)
}

fn confirm(runtime: &Runtime) -> Result<(), CliError> {
    if runtime.output.json {
        runtime.output.print_json(&json!({ "ok": true }))?;
    } else {
        runtime.output.print_human("Config updated.");
    }
    Ok(())
}

fn models(runtime: &Runtime) -> Result<(), CliError> {
    let current = runtime.settings.model_option().value;
    if runtime.output.json {
        let payload = MODELS
            .iter()
            .map(|m| {
                json!({
                    "value": m.value,
                    "name": m.name,
                    "description": m.description,
                    "active": m.value == current,
                })
            })
            .collect::<Vec<_>>();
        return runtime.output.print_json(&json!({ "models": payload }));
    }

    for model in MODELS {
        let marker = if model.value == current { "*" } else { " " };
        runtime
            .output
            .print_human(&format!("{marker} {:<14} {}", model.value, model.name));
        runtime
            .output
            .print_human(&format!("  {:<14} {}", "", model.description));
    }
    Ok(())
}

fn personas(runtime: &Runtime) -> Result<(), CliError> {
    let current = catalog::persona_for(&runtime.settings.developer_message_or_default());
    if runtime.output.json {
        let mut payload = PERSONAS
            .iter()
            .map(|p| json!({ "name": p.name, "prompt": p.prompt, "active": p.name == current }))
            .collect::<Vec<_>>();
        payload.push(json!({
            "name": CUSTOM_PERSONA,
            "prompt": null,
            "active": current == CUSTOM_PERSONA,
        }));
        return runtime.output.print_json(&json!({ "personas": payload }));
    }

    for persona in PERSONAS {
        let marker = if persona.name == current { "*" } else { " " };
        runtime
            .output
            .print_human(&format!("{marker} {}: {}", persona.name, persona.prompt));
    }
    let marker = if current == CUSTOM_PERSONA { "*" } else { " " };
    runtime.output.print_human(&format!(
        "{marker} {CUSTOM_PERSONA}: (your own developer message)"
    ));
    Ok(())
}

fn path(runtime: &Runtime) -> Result<(), CliError> {
    let path = config_path()?;
    if runtime.output.json {
        runtime.output.print_json(&json!({ "path": path }))?;
    } else {
        runtime.output.print_human(&path.display().to_string());
    }
    Ok(())
}

fn reset(runtime: &mut Runtime) -> Result<(), CliError> {
    runtime.settings = Settings::default();
    let path = save_settings(&runtime.settings)?;
    if runtime.output.json {
        runtime
            .output
            .print_json(&json!({ "ok": true, "path": path }))?;
    } else {
        runtime
            .output
            .print_human(&format!("Settings reset: {}", path.display()));
    }
    Ok(())
}
