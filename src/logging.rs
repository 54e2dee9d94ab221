//! Logging setup shared by both binaries

use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl LogLevel {
    /// Verbose count overrides log level
    pub fn effective(self, verbose_count: u8) -> LogLevel {
        match verbose_count {
            0 => self,
            1 => LogLevel::Verbose,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Default filter directives for this level
    pub fn filter(self) -> &'static str {
        match self {
            LogLevel::Error => "avatar_bridge=error,tower_http=error,webrtc=error",
            LogLevel::Warn => "avatar_bridge=warn,tower_http=warn,webrtc=warn",
            LogLevel::Info => "avatar_bridge=info,tower_http=info,webrtc=warn",
            LogLevel::Verbose => "avatar_bridge=debug,tower_http=info,webrtc=warn",
            LogLevel::Debug => "avatar_bridge=debug,tower_http=debug,webrtc=info",
            LogLevel::Trace => "avatar_bridge=trace,tower_http=debug,webrtc=debug",
        }
    }
}

/// Initialize the global subscriber; `RUST_LOG` takes priority
pub fn init_logging(level: LogLevel, verbose_count: u8) {
    let filter = level.effective(verbose_count).filter();

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
