//! Logging configuration using tracing.
//!
//! Server events and the supervised app's forwarded output share one
//! subscriber; app lines are logged under the [`APP_TARGET`] target so they
//! can be filtered separately.

use crate::config::LogConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target used for lines forwarded from the app's stdout/stderr
pub const APP_TARGET: &str = "app";

/// Initialize logging from the `[log]` configuration.
///
/// `RUST_LOG` takes precedence over everything configured here.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config)))
        .unwrap_or_else(|_| EnvFilter::new(directives(&LogConfig::default())));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

/// Filter directives for `config`: the global level, plus an `app` override
/// when forwarded output is switched off.
fn directives(config: &LogConfig) -> String {
    let level = config.level.trim();
    if config.app_output {
        level.to_string()
    } else {
        format!("{level},{APP_TARGET}=off")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_config(level: &str, app_output: bool) -> LogConfig {
        LogConfig {
            level: level.to_string(),
            app_output,
        }
    }

    #[test]
    fn test_directives_keep_app_output_by_default() {
        assert_eq!(directives(&LogConfig::default()), "info");
        assert_eq!(directives(&log_config(" debug ", true)), "debug");
    }

    #[test]
    fn test_directives_silence_app_target() {
        let directives = directives(&log_config("warn", false));
        assert_eq!(directives, "warn,app=off");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_invalid_level_is_rejected_by_filter() {
        assert!(EnvFilter::try_new(directives(&log_config("app=verbose", true))).is_err());
        assert!(EnvFilter::try_new(directives(&LogConfig::default())).is_ok());
    }
}
