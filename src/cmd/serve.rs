//! Gateway server command (`gantry serve`).

use anyhow::Result;

use gantry::config::GatewayConfig;
use gantry::gateway::server::{ServeOptions, start_server};

pub async fn cmd_serve(config: GatewayConfig, open: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        config = %config.config_path.display(),
        preview_root = %config.preview_root().display(),
        binary = %config.binary(),
        "starting gateway"
    );
    start_server(config, ServeOptions { open }).await
}
