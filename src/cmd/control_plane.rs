//! Setup gate and worker proxy command, `opencode-platform control-plane`.

use anyhow::Result;
use opencode_platform::controlplane::server::{ServerConfig, start_server};

pub async fn cmd_control_plane(port: Option<u16>) -> Result<()> {
    start_server(ServerConfig { port }).await
}
