//! Configuration view and validation commands: `mender config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use mender::config::{CONFIG_DIR, CONFIG_FILE, MenderConfig, MenderToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Mender Configuration");
            println!("====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No mender.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include MENDER_* overrides.
            let config = MenderConfig::new(project_dir.to_path_buf())?;
            let toml = &config.toml;

            println!("[pipeline]");
            println!("  max_iterations = {}", toml.pipeline.max_iterations);
            println!(
                "  max_iterations_ceiling = {}",
                toml.pipeline.max_iterations_ceiling
            );
            println!("  stage_timeout_secs = {}", toml.pipeline.stage_timeout_secs);
            println!("  stage_retries = {}", toml.pipeline.stage_retries);
            println!("  retry_backoff_ms = {}", toml.pipeline.retry_backoff_ms);
            println!("  max_code_length = {}", toml.pipeline.max_code_length);
            println!(
                "  checkpoint_retention = \"{}\"",
                toml.pipeline.checkpoint_retention
            );
            println!();

            println!("[collaborator]");
            println!("  endpoint = \"{}\"", toml.collaborator.endpoint);
            println!("  model = \"{}\"", toml.collaborator.model);
            let key_state = match std::env::var(&toml.collaborator.api_key_env) {
                Ok(v) if !v.trim().is_empty() => "set",
                _ => "not set",
            };
            println!(
                "  api_key_env = \"{}\" ({})",
                toml.collaborator.api_key_env, key_state
            );
            println!("  max_tokens = {}", toml.collaborator.max_tokens);
            let t = &toml.collaborator.temperatures;
            println!(
                "  temperatures = scanner {}, fixer {}, validator {}",
                t.scanner, t.fixer, t.validator
            );
            println!();

            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!();

            if !config_path.exists() {
                println!("Run 'mender config init' to create a mender.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No mender.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = MenderToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("mender.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            let toml = MenderToml::default();
            toml.save(&config_path)?;

            println!("Created mender.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pipeline] max_iterations, stage_timeout_secs, stage_retries");
            println!("  - [collaborator] endpoint, model, api_key_env");
            println!("  - [server] host, port");
            println!();
        }
    }

    Ok(())
}
