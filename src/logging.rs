//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber. The level comes from `RUST_LOG`
//! when set, otherwise from `[logging]` settings; `LOG_FORMAT` overrides the
//! configured output format.

use std::env;
use std::io;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Log output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers
    Json,
    /// Multi-field human readable output
    Pretty,
    /// Single-line output without targets
    Compact,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line numbers
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Build from settings, applying `LOG_FORMAT` if present.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let format = env::var("LOG_FORMAT")
            .map(|f| LogFormat::parse(&f))
            .unwrap_or_else(|_| LogFormat::parse(&settings.format));

        Self {
            level: settings.level.clone(),
            format,
            include_location: settings.include_location || env::var("LOG_INCLUDE_LOCATION").is_ok(),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let base = env::var("RUST_LOG").unwrap_or_else(|_| self.level.clone());

        let mut filter = EnvFilter::new(base);
        for directive in ["hyper=warn", "reqwest=warn", "tower_http=info", "rusqlite=warn"] {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    }

    /// Install the global subscriber.
    ///
    /// Returns `false` when a subscriber was already installed (tests, or a
    /// host application that set up its own).
    pub fn init(&self) -> bool {
        let registry = tracing_subscriber::registry().with(self.env_filter());

        let installed = match self.format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .with_file(self.include_location)
                        .with_line_number(self.include_location)
                        .with_target(true)
                        .with_writer(io::stdout)
                        .json(),
                )
                .try_init()
                .is_ok(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_file(self.include_location)
                        .with_line_number(self.include_location)
                        .with_target(true)
                        .with_writer(io::stdout),
                )
                .try_init()
                .is_ok(),
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(io::stdout),
                )
                .try_init()
                .is_ok(),
        };

        if installed {
            info!(
                service.version = env!("CARGO_PKG_VERSION"),
                log.level = %self.level,
                log.format = ?self.format,
                "modelforge starting"
            );
        }
        installed
    }
}
