//! Structured logging setup
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global `tracing` subscriber. Only the first call has an
/// effect; later calls (and a subscriber installed elsewhere) are left alone.
pub fn init_logging(config: &LoggingConfig) {
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr);

        let installed = if config.json_format {
            builder.json().with_current_span(true).try_init()
        } else {
            builder.compact().try_init()
        };

        if installed.is_ok() {
            tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
        assert!(INSTALLED.get().is_some());
    }
}
