use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::event::{DEFAULT_QUEUE_SIZE, DEFAULT_SEND_TIMEOUT};

/// Prefix of the environment variables read by [`Settings::new`]
const ENV_PREFIX: &str = "IOCHECK";

fn default_event_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_event_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Capacity of the event queue in front of stdout
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    /// How long a full event queue is tolerated before terminating
    #[serde(default = "default_event_send_timeout_ms")]
    pub event_send_timeout_ms: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_queue_size: default_event_queue_size(),
            event_send_timeout_ms: default_event_send_timeout_ms(),
            debug: false,
        }
    }
}

impl Settings {
    /// Load settings from `IOCHECK_*` environment variables.
    ///
    /// Unset variables keep their defaults, so an empty environment gives
    /// the standard protocol behaviour.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_queue_size == 0 {
            return Err(ConfigError::Message(
                "event_queue_size must be at least 1".to_string(),
            ));
        }
        if self.event_send_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "event_send_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn event_send_timeout(&self) -> Duration {
        Duration::from_millis(self.event_send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 3] = [
        "IOCHECK_EVENT_QUEUE_SIZE",
        "IOCHECK_EVENT_SEND_TIMEOUT_MS",
        "IOCHECK_DEBUG",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.event_queue_size, 128);
        assert_eq!(settings.event_send_timeout(), Duration::from_secs(2));
        assert!(!settings.debug);
    }

    #[test]
    #[serial]
    fn test_load_settings() {
        clear_env();
        unsafe {
            std::env::set_var("IOCHECK_EVENT_QUEUE_SIZE", "16");
            std::env::set_var("IOCHECK_EVENT_SEND_TIMEOUT_MS", "500");
            std::env::set_var("IOCHECK_DEBUG", "true");
        }

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings.event_queue_size, 16);
        assert_eq!(settings.event_send_timeout(), Duration::from_millis(500));
        assert!(settings.debug);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_zero_queue() {
        clear_env();
        unsafe {
            std::env::set_var("IOCHECK_EVENT_QUEUE_SIZE", "0");
        }

        assert!(Settings::new().is_err());

        clear_env();
    }
}
