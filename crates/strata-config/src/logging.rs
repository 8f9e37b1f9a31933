//! Tracing subscriber setup from [`LoggingConfig`].

use crate::error::ConfigError;
use crate::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `Ok(false)` when a
/// global subscriber was already set; the existing one keeps receiving events.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = build_filter(config)?;
    let json = config.format == LogFormat::Json;

    let installed = match config.file {
        Some(ref path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ConfigError::create_dir(parent, e))?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::write_file(path, e))?;
            let builder = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false);
            if json {
                install(builder.json().finish())
            } else {
                install(builder.finish())
            }
        }
        None => {
            let builder = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr);
            if json {
                install(builder.json().finish())
            } else {
                install(builder.with_ansi(true).finish())
            }
        }
    };

    if !installed {
        warn!("Using existing tracing subscriber (logging config ignored)");
    }
    Ok(installed)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))
}

fn install(subscriber: impl SubscriberInitExt) -> bool {
    subscriber.try_init().is_ok()
}
