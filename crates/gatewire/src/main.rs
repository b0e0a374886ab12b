//! gatewire - gateway client
//!
//! Connects to the gateway, keeps the session alive and prints every
//! dispatch payload to stdout, one per line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use gatewire::{GatewayClient, GatewayConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gatewire")]
#[command(about = "Persistent compressed gateway client")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream dispatch payloads to stdout
    Connect {
        /// Path to config file
        #[arg(short, long, default_value = "gatewire.toml")]
        config: PathBuf,

        /// Token, overriding the one in the config file
        #[arg(long, env = "GATEWIRE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Connect to this gateway URL instead of resolving one
        #[arg(long)]
        gateway: Option<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "gatewire.toml")]
        output: PathBuf,

        /// Token to put in the file
        #[arg(long, default_value = "changeme")]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries payloads.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("gatewire=info".parse()?))
        .with((!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .init();

    match cli.command {
        Commands::Connect {
            config,
            token,
            gateway,
        } => connect(config, token, gateway).await,
        Commands::InitConfig { output, token } => init_config(output, token),
    }
}

async fn connect(
    config_path: PathBuf,
    token: Option<String>,
    gateway: Option<String>,
) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting gatewire");

    let mut config = GatewayConfig::load(&config_path, token)?;
    if gateway.is_some() {
        config.gateway_url = gateway;
        config.validate()?;
    }

    let client = GatewayClient::new(config)?;

    let run = client.run(|mut inbound, _outbound| async move {
        while let Some(item) = inbound.next().await {
            match item {
                Ok(payload) => println!("{payload}"),
                Err(e) => warn!(error = %e, "connection terminated"),
            }
        }
    });

    tokio::select! {
        result = run => {
            let outcome = result?;
            if outcome.is_resumable() {
                error!(status = %outcome.status, "gave up reconnecting");
                anyhow::bail!("gateway connection lost: {}", outcome.status);
            }
            info!(status = %outcome.status, "session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    Ok(())
}

fn init_config(output: PathBuf, token: String) -> anyhow::Result<()> {
    let config = GatewayConfig::new(token);
    std::fs::write(&output, config.to_toml()?)?;
    info!(path = %output.display(), "wrote sample config");
    Ok(())
}
