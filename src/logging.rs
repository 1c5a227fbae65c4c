use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Verbosity exposed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    /// Warnings and errors only
    Silent,
    /// Progress for every server and step
    #[default]
    Info,
    /// Also every remote script and its output
    Debug,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Silent => "supaship=warn",
            LogLevel::Info => "supaship=info",
            LogLevel::Debug => "supaship=debug",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Silent => write!(f, "silent"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

/// Build the filter: `RUST_LOG` wins when set, otherwise the CLI level.
pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Plain-text subscriber on stderr. Call once, from `main`.
pub fn init(level: LogLevel) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_still_shows_warnings() {
        assert_eq!(LogLevel::Silent.directive(), "supaship=warn");
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }
}
