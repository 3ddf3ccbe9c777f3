//! Tracing subscriber setup shared by the faucet binary and tests

use crate::error::LoggingError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the fmt subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level (trace, debug, info, warn, error)
    pub level: String,

    pub format: LogFormat,

    /// Extra `RUST_LOG` style directives layered over `level`
    #[serde(default)]
    pub directives: Option<String>,

    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            directives: None,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Reads `ENABLE_JSON_LOGGING` (`true` or `1`) and `RUST_LOG`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let json = matches!(lookup("ENABLE_JSON_LOGGING").as_deref(), Some("true" | "1"));
        Self {
            format: if json { LogFormat::Json } else { LogFormat::Compact },
            directives: lookup("RUST_LOG").filter(|d| !d.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Filter string handed to `EnvFilter`
    pub fn filter_string(&self) -> String {
        match &self.directives {
            Some(directives) => format!("{},{}", self.level, directives),
            None => self.level.clone(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(config.filter_string())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    }
    .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!("Logging initialized at {} ({:?})", config.level, config.format);
    Ok(())
}

/// Test subscriber; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}
