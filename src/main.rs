use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use avatar_bridge::bridge;
use avatar_bridge::config::BridgeConfig;
use avatar_bridge::logging::{init_logging, LogLevel};

/// Live bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "avatar-bridge")]
#[command(version, about = "Bridge raw audio/video pipes into a WebRTC room", long_about = None)]
struct CliArgs {
    /// Room to publish into
    room: String,

    /// Signaling endpoint (also the bind address of the embedded room)
    #[arg(long, env = "SESSION_URL", value_name = "URL")]
    url: Option<String>,

    /// API key required from viewers
    #[arg(long, env = "SESSION_API_KEY", value_name = "KEY")]
    api_key: Option<String>,

    /// API secret required from viewers
    #[arg(long, env = "SESSION_API_SECRET", value_name = "SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// TOML file overriding the built-in preset
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Participant identity (default: Avatar-xxxxxxxx)
    #[arg(long, value_name = "NAME")]
    identity: Option<String>,

    /// Log every start code seen in the encoded video stream
    #[arg(long)]
    diagnostics: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Credentials may live in .env.local
    let _ = dotenvy::from_filename(".env.local");

    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting Avatar Bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = BridgeConfig::live(args.room.clone())
        .with_file(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    // Apply CLI argument overrides to config (only if explicitly specified)
    config.room = args.room;
    if let Some(url) = args.url {
        config.session.url = url;
    }
    if args.api_key.is_some() {
        config.session.api_key = args.api_key;
    }
    if args.api_secret.is_some() {
        config.session.api_secret = args.api_secret;
    }
    if args.identity.is_some() {
        config.identity = args.identity;
    }
    if args.diagnostics {
        config.diagnostics = true;
    }

    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    let report = bridge::launch(config, shutdown)
        .await
        .context("Bridge failed")?;
    tracing::info!("Exiting: {}", report.reason);
    Ok(())
}

fn spawn_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}
