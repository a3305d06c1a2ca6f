//! Tracing subscriber setup.
//!
//! Every line written or read is a `debug` event carrying the port, and every
//! transaction a `debug` event carrying the instrument id. Device faults and
//! echo mismatches are `warn`. Session open/close are `info`.

use crate::config::ApplicationConfig;
use crate::error::LabError;
use tracing_subscriber::EnvFilter;

/// Builds the filter for `level`. `RUST_LOG`, when set, wins.
pub fn env_filter(level: &str) -> Result<EnvFilter, LabError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("rust_labio={}", level))
        .map_err(|e| LabError::Configuration(format!("Invalid log level '{}': {}", level, e)))
}

/// Installs a global `fmt` subscriber. Fails if one is already installed.
pub fn init(level: &str) -> Result<(), LabError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| LabError::Configuration(format!("Failed to install tracing subscriber: {}", e)))
}

/// Installs the subscriber at the configured `log_level`.
pub fn init_from_config(application: &ApplicationConfig) -> Result<(), LabError> {
    init(&application.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_builds_a_filter() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = env_filter("debug").unwrap();
            assert!(filter.to_string().contains("rust_labio=debug"));
        }
    }

    #[test]
    fn every_accepted_config_level_builds_a_filter() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let config = crate::config::LabConfig::from_toml_str(&format!(
                "[application]\nname = \"bench\"\nlog_level = \"{}\"\n",
                level
            ))
            .unwrap();
            assert!(env_filter(&config.application.log_level).is_ok(), "{level}");
        }
    }
}
