// Logger initialization
// stderr always; a daily rolling file as well when a log directory is configured

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "bioflow-assistant.log";

/// Built from the configured filter only. `Config::from_env` already folds
/// `RUST_LOG` into it and `--log-level` overwrites it afterwards.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(&config.filter)
}

/// Install the global subscriber; keep the returned guard alive to flush the file writer
pub fn init_logger(config: &LoggingConfig) -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter(config))
                .with(stderr_layer)
                .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter(config))
                .with(stderr_layer)
                .init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_filter_is_used() {
        let config = LoggingConfig {
            filter: "bioflow_assistant=debug".to_string(),
            log_dir: None,
        };
        assert_eq!(env_filter(&config).to_string(), "bioflow_assistant=debug");
    }
}
