//! HTTP server command: `mender serve`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use mender::config::MenderConfig;
use mender::pipeline::RetentionPolicy;
use mender::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    project_dir: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let config = MenderConfig::new(project_dir)?;
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }
    if config.retention() == RetentionPolicy::Keep {
        tracing::info!(
            "finished runs stay in memory until restart; set checkpoint_retention = \"remove_on_terminal\" to discard them"
        );
    }

    let server = &config.toml.server;
    let server_config = ServerConfig {
        host: host.unwrap_or_else(|| server.host.clone()),
        port: port.unwrap_or(server.port),
        dev_mode: dev,
    };
    let orchestrator = Arc::new(config.build_orchestrator()?);
    start_server(server_config, orchestrator).await
}
