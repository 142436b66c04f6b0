//! Configuration view and validation commands (`gantry config`).

use anyhow::{Context, Result};

use gantry::config::{GatewayConfig, GatewayToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &GatewayConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config.config_path.exists() {
                println!("# Config file: {}", config.config_path.display());
            } else {
                println!("# No config file at {} (defaults)", config.config_path.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();
            print!("{}", config.to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            let path = &config.config_path;
            if path.exists() {
                println!("gateway.toml already exists at {}", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let content = toml::to_string_pretty(&GatewayToml::default())
                .context("Failed to serialize gateway.toml")?;
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created gateway.toml at {}", path.display());
        }
    }
    Ok(())
}
