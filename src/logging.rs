//! Diagnostic logging setup.
//!
//! Diagnostic events go to stderr, filtered by `BATON_LOG` (an `EnvFilter` directive, default
//! `info`, or `debug` with `--verbose`). When the project has a `.baton/logs` directory the same
//! events are also written to a daily-rotated file there. The per-run audit log is separate.

use anyhow::{Result, anyhow};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const LOG_ENV: &str = "BATON_LOG";
const LOG_FILE_PREFIX: &str = "baton.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Keep the returned guard alive until exit so the file
/// writer flushes.
pub fn init(verbose: bool, format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);
    layers.push(match format {
        LogFormat::Plain => stderr.without_time().boxed(),
        LogFormat::Json => stderr.json().boxed(),
    });

    let guard = match log_dir.filter(|dir| dir.is_dir()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(verbose))
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_follows_verbosity() {
        let _guard = crate::baton_config::ENV_LOCK.lock().unwrap();
        let saved = std::env::var(LOG_ENV).ok();
        unsafe { std::env::remove_var(LOG_ENV) };

        assert_eq!(env_filter(false).to_string(), "info");
        assert_eq!(env_filter(true).to_string(), "debug");

        unsafe { std::env::set_var(LOG_ENV, "baton=trace") };
        assert_eq!(env_filter(false).to_string(), "baton=trace");

        unsafe { std::env::remove_var(LOG_ENV) };
        if let Some(val) = saved {
            unsafe { std::env::set_var(LOG_ENV, val) };
        }
    }
}
