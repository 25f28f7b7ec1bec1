//! Structured logging facade. Every session record keeps a child `Logger`
//! created with `log.new(o!())`; this module only owns building the root
//! logger from a small TOML-describable config.

pub use slog::{debug, error, info, o, trace, warn, Logger};
pub use sloggers::Build;

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: default_level(),
            stderr: true,
        }
    }
}

fn default_level() -> String {
    "debug".to_string()
}

/// Builds the process root logger from the supplied config. Falls back to
/// a discarding logger if the terminal cannot be initialised (e.g. headless
/// test runs).
pub fn build(config: &LogConfig) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(parse_severity(&config.level));
    builder.destination(if config.stderr {
        Destination::Stderr
    } else {
        Destination::Stdout
    });

    builder.build().unwrap_or_else(|_| Logger::root(slog::Discard, o!()))
}

/// A logger that discards everything; used in unit tests and as the
/// default for session records constructed without an explicit parent.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}

fn parse_severity(level: &str) -> Severity {
    match level {
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" | "warn" => Severity::Warning,
        "info" => Severity::Info,
        "debug" => Severity::Debug,
        "trace" => Severity::Trace,
        _ => Severity::Debug,
    }
}
