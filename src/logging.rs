use crate::config::LoggingSettings;
use std::str::FromStr;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Failed to install subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber. `RUST_LOG` overrides `settings.level`.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_env_filter(settings)?;

    let fmt_layer = if settings.json {
        layer().json().with_current_span(false).boxed()
    } else {
        layer().compact().with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn build_env_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    let level = LevelFilter::from_str(&settings.level)
        .map_err(|_| LoggingError::InvalidLevel(settings.level.clone()))?;

    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let settings = LoggingSettings {
            level: "chatty".to_string(),
            json: false,
        };
        assert!(matches!(
            build_env_filter(&settings),
            Err(LoggingError::InvalidLevel(level)) if level == "chatty"
        ));
    }

    #[test]
    fn test_level_names_parse() {
        for level in ["trace", "debug", "info", "warn", "error", "off"] {
            let settings = LoggingSettings {
                level: level.to_string(),
                json: false,
            };
            assert!(build_env_filter(&settings).is_ok(), "{level}");
        }
    }
}
