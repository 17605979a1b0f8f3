//! Structured logging with tracing
//!
//! Per-record audit events are emitted under the `reseal::audit` target so
//! they can be filtered independently, e.g. `RUST_LOG=info,reseal::audit=warn`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,

    /// Enable JSON format output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Parse log level from string
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.parse_level().as_str().to_lowercase()))
    }
}

/// Initialize the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to
/// stderr so stdout stays free for command output.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let subscriber = Registry::default().with(config.env_filter());

    if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr);

        subscriber
            .with(json_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();

        subscriber
            .with(fmt_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    }

    tracing::debug!(
        level = %config.level,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}
