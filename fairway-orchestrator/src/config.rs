//! Orchestrator configuration
//!
//! Defines all configurable parameters for the engine: bind address, timeout
//! windows and the sweep interval that enforces them.

use std::time::Duration;

/// Orchestrator configuration
///
/// All timeouts and intervals are configurable to allow tuning for different
/// deployment scenarios. The sweep interval should be short relative to the
/// timeout windows; timeouts fire "at least after" the window, not exactly at
/// it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to (e.g. "0.0.0.0:8080")
    pub bind_addr: String,

    /// Maximum time a sequence may sit without activity before it is
    /// transitioned to `timedout`
    pub sequence_timeout: Duration,

    /// Maximum time a dispatched task may go without producing a `started`
    /// event before the whole sequence is transitioned to `timedout`
    pub task_start_timeout: Duration,

    /// How often the timeout sweeper scans active instances
    pub sweep_interval: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BIND_ADDR (optional, default: "0.0.0.0:8080")
    /// - SEQUENCE_TIMEOUT (optional, seconds, default: 3600)
    /// - TASK_START_TIMEOUT (optional, seconds, default: 300)
    /// - SWEEP_INTERVAL (optional, seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let sequence_timeout = std::env::var("SEQUENCE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        let task_start_timeout = std::env::var("TASK_START_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let sweep_interval = std::env::var("SWEEP_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        let config = Self {
            bind_addr,
            sequence_timeout,
            task_start_timeout,
            sweep_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.sequence_timeout.is_zero() {
            anyhow::bail!("sequence_timeout must be greater than 0");
        }

        if self.task_start_timeout.is_zero() {
            anyhow::bail!("task_start_timeout must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than 0");
        }

        if self.sweep_interval > self.task_start_timeout {
            anyhow::bail!("sweep_interval must not exceed task_start_timeout");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            sequence_timeout: Duration::from_secs(3600),
            task_start_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sequence_timeout, Duration::from_secs(3600));
        assert_eq!(config.task_start_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.bind_addr = String::new();
        assert!(config.validate().is_err());

        config.bind_addr = "0.0.0.0:8080".to_string();
        config.sweep_interval = Duration::from_secs(600);
        assert!(config.validate().is_err());
    }
}
