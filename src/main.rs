use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cmd;

#[derive(Parser)]
#[command(name = "opencode-platform")]
#[command(version, about = "Per-project opencode sandboxes and their setup control plane")]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the project management panel
    Panel {
        /// Port to serve on (defaults to PANEL_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// TOML file with a [container] section
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local UI dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Launch the setup gate that proxies to the worker once configured
    ControlPlane {
        /// Port to serve on (defaults to PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose {
        "opencode_platform=debug,worker=debug,tower_http=debug,info"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Panel { port, config, dev } => cmd::cmd_panel(port, config, dev).await?,
        Commands::ControlPlane { port } => cmd::cmd_control_plane(port).await?,
    }

    Ok(())
}
