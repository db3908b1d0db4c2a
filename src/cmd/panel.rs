//! Management panel server command, `opencode-platform panel`.

use std::path::PathBuf;

use anyhow::Result;
use opencode_platform::panel::server::{ServerConfig, start_server};

pub async fn cmd_panel(port: Option<u16>, config_file: Option<PathBuf>, dev: bool) -> Result<()> {
    if let Some(path) = &config_file
        && !path.exists()
    {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    start_server(ServerConfig {
        port,
        config_file,
        dev_mode: dev,
    })
    .await
}
