//! warmpoold: the WarmPool daemon binary.
//!
//! # Usage
//!
//! ```text
//! warmpoold serve --config /etc/warmpool/warmpool.toml --port 7080
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use warmpoold::DaemonConfig;

#[derive(Parser)]
#[command(name = "warmpoold", about = "WarmPool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the claim, quota and metrics API.
    Serve {
        /// Path to warmpool.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the port of `server.listen`.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,warmpoold=debug,warmpool=debug"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, port } => {
            let mut config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                config.server.listen.set_port(port);
            }
            let config = config.with_env_overrides(|key| std::env::var(key).ok());
            warmpoold::serve::run(config).await
        }
    }
}
