//! Log setup shared by the syndica binaries.
//!
//! Output goes to stderr. `RUST_LOG` takes precedence for filtering, then
//! `SYNDICA_LOG_LEVEL`, then the binary's `--verbose` flag. The format is
//! line-oriented text unless `SYNDICA_LOG_FORMAT=json`.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format '{}' (expected text or json)", s)),
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if let Ok(level) = std::env::var("SYNDICA_LOG_LEVEL") {
        return EnvFilter::new(level);
    }
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

fn format_from_env() -> LogFormat {
    std::env::var("SYNDICA_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Install the global subscriber. Call once, early in main.
pub fn init(verbose: bool) {
    let filter = env_filter(verbose);
    match format_from_env() {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}
