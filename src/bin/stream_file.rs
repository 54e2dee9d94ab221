//! Static-file variant: streams `video.i420` and `audio.raw` into a fixed
//! room for a fixed run time.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use avatar_bridge::bridge;
use avatar_bridge::config::BridgeConfig;
use avatar_bridge::logging::{init_logging, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "avatar-bridge-file")]
#[command(version, about = "Stream static raw audio/video files into a WebRTC room", long_about = None)]
struct CliArgs {
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

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let mut config = BridgeConfig::file()
        .with_file(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    if let Some(url) = args.url {
        config.session.url = url;
    }
    if args.api_key.is_some() {
        config.session.api_key = args.api_key;
    }
    if args.api_secret.is_some() {
        config.session.api_secret = args.api_secret;
    }

    tracing::info!(
        "Streaming {} and {} into room '{}'",
        config.input.video_path.display(),
        config.input.audio_path.display(),
        config.room
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            ctrl_c.cancel();
        }
    });

    let report = bridge::launch(config, shutdown)
        .await
        .context("Bridge failed")?;
    tracing::info!(
        "Finished: {}, {} video / {} audio frames",
        report.reason,
        report.video.frames_delivered(),
        report.audio.frames_delivered()
    );
    Ok(())
}
