//! # Structured Logging
//!
//! Installs a `tracing` subscriber for the lotune utilities with support for:
//!
//! - Pretty, compact and JSON output
//! - Log level filtering, with `RUST_LOG` taking precedence
//! - Mapping `-v` counts to levels
//!
//! Diagnostics go to stderr so the measurement report on stdout stays clean.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lotune_core::config::{LogConfig, LogFormat};
//! use lotune_core::observe::init_logging;
//!
//! init_logging(&LogConfig {
//!     level: "debug".to_string(),
//!     format: LogFormat::Json,
//! });
//!
//! tracing::info!(offset = 0.0002, "LO lost lock");
//! ```

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level name for a `-v` count: 0 → warn, 1 → info, 2 → debug, 3+ → trace.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Build the filter: `RUST_LOG` if set and valid, else the configured level.
fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    })
}

/// Initialize the global logging subscriber.
///
/// This should be called once at application startup.
/// Subsequent calls are silently ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = build_filter(config);

    let result = match config.format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_file(true)
                    .with_line_number(true),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    // Already installed (tests, or a second call)
    let _ = result;
}
