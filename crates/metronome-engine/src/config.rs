use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Engine settings, loaded from a TOML file with `METRONOME_*` environment
/// variable overrides (environment wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between scheduler ticks. Classic cron cadence is 60; finer
    /// intervals are fine, a due minute still fires each task once.
    /// Override with env var: METRONOME_TICK_INTERVAL_SECS=10
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// IANA zone applied to registrations that do not pick their own.
    /// Unset means the process-local timezone.
    /// Override with env var: METRONOME_DEFAULT_TIMEZONE=Europe/Paris
    #[serde(default)]
    pub default_timezone: Option<String>,

    /// How many recent run reports the engine keeps for inspection.
    /// Override with env var: METRONOME_RUN_HISTORY_LIMIT=500
    #[serde(default = "default_run_history_limit")]
    pub run_history_limit: usize,

    /// Capacity of the optional run-report channel.
    /// Override with env var: METRONOME_REPORT_CHANNEL_CAPACITY=64
    #[serde(default = "default_report_channel_capacity")]
    pub report_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            default_timezone: None,
            run_history_limit: default_run_history_limit(),
            report_channel_capacity: default_report_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, merging the TOML file at `config_path` (when
    /// given, otherwise `metronome.toml` in the working directory) with
    /// `METRONOME_*` environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("metronome.toml");

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("METRONOME_"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(EngineError::Config(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.report_channel_capacity == 0 {
            return Err(EngineError::Config(
                "report_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_run_history_limit() -> usize {
    1000
}

fn default_report_channel_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: EngineConfig = Figment::new()
            .merge(Toml::string("default_timezone = \"Europe/Paris\""))
            .extract()
            .unwrap();

        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.default_timezone.as_deref(), Some("Europe/Paris"));
        assert_eq!(config.run_history_limit, 1000);
        assert_eq!(config.report_channel_capacity, 256);
    }

    #[test]
    fn file_values_override_defaults() {
        let config: EngineConfig = Figment::new()
            .merge(Toml::string(
                "tick_interval_secs = 5\nrun_history_limit = 10",
            ))
            .extract()
            .unwrap();

        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.run_history_limit, 10);
        assert_eq!(config.default_timezone, None);
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let config = EngineConfig {
            tick_interval_secs: 0,
            ..EngineConfig::default()
        };

        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn missing_file_still_yields_defaults() {
        let config = EngineConfig::load(Some("does-not-exist.toml")).unwrap();
        assert_eq!(config.tick_interval_secs, 60);
    }
}
