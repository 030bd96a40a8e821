//! Configuration management for BCNP.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::controller::{CommandLimits, ControllerConfig};
use crate::dispatcher::DispatcherConfig;
use crate::error::{Error, Result};
use crate::protocol::MIN_FRAME_SIZE;
use crate::queue::QueueConfig;
use crate::telemetry::TelemetryConfig;
use crate::transport::{TcpConfig, UdpConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dispatcher and parser settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Drive queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Drive command limits.
    #[serde(default)]
    pub limits: CommandLimits,

    /// Telemetry batching.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// TCP adapter settings.
    #[serde(default)]
    pub tcp: TcpConfig,

    /// UDP adapter settings.
    #[serde(default)]
    pub udp: UdpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.parser.buffer_size < MIN_FRAME_SIZE {
            return Err(Error::InvalidConfig(format!(
                "parser buffer must hold at least header + CRC ({MIN_FRAME_SIZE} bytes)"
            )));
        }

        if self.dispatcher.parser.max_parse_iterations_per_push == 0 {
            return Err(Error::InvalidConfig(
                "parser iteration budget must be positive".into(),
            ));
        }

        if self.queue.connection_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "queue connection timeout must be positive".into(),
            ));
        }

        if self.tcp.tx_buffer_capacity == 0 {
            return Err(Error::InvalidConfig(
                "tcp tx buffer capacity must be positive".into(),
            ));
        }

        if self.limits.vx_min > self.limits.vx_max
            || self.limits.omega_min > self.limits.omega_max
            || self.limits.duration_min > self.limits.duration_max
        {
            return Err(Error::InvalidConfig("command limits inverted".into()));
        }

        Ok(())
    }

    /// Controller view of this configuration.
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            dispatcher: self.dispatcher.clone(),
            queue: self.queue.clone(),
            limits: self.limits,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
    }

    Ok(())
}
