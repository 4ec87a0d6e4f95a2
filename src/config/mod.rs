use once_cell::sync::Lazy;
use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "perilmq.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Maximum unacknowledged deliveries in flight per subscription.
    /// Zero means unlimited.
    pub prefetch: u16,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { prefetch: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Exchange that receives messages rejected with `NackDiscard`.
    pub dead_letter_exchange: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dead_letter_exchange: "peril_dlx".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub subscriber: SubscriberConfig,
    pub queues: QueueConfig,
}

/// Global configuration: `perilmq.toml` in the working directory if present,
/// built-in defaults otherwise.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    load_config(DEFAULT_CONFIG_PATH).unwrap_or_default()
});

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let config = toml::from_str(&raw)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_tables_are_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.subscriber.prefetch, 10);
        assert_eq!(config.queues.dead_letter_exchange, "peril_dlx");
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [subscriber]
            prefetch = 25

            [queues]
            dead_letter_exchange = "graveyard"
            "#,
        )
        .unwrap();
        assert_eq!(config.subscriber.prefetch, 25);
        assert_eq!(config.queues.dead_letter_exchange, "graveyard");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config("definitely/not/a/real/path.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
