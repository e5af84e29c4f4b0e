use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Timing knobs of a quiz session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiet period after the last answer edit before a draft save is issued.
    pub debounce: Duration,
    /// Wait before retrying a failed draft save.
    pub retry_backoff: Duration,
    /// Countdown granularity.
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3_000),
            retry_backoff: Duration::from_millis(5_000),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `QUIZ_AUTOSAVE_DEBOUNCE_MS` and `QUIZ_AUTOSAVE_RETRY_MS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMillis` when a variable is set but is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            debounce: millis(&lookup, "QUIZ_AUTOSAVE_DEBOUNCE_MS")?.unwrap_or(default.debounce),
            retry_backoff: millis(&lookup, "QUIZ_AUTOSAVE_RETRY_MS")?
                .unwrap_or(default.retry_backoff),
            tick_interval: default.tick_interval,
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ConfigError::InvalidMillis { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce, Duration::from_secs(3));
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = EngineConfig::from_lookup(|var| match var {
            "QUIZ_AUTOSAVE_DEBOUNCE_MS" => Some("1500".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.debounce, Duration::from_millis(1_500));
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
    }

    #[test]
    fn lookup_rejects_garbage_and_zero() {
        let err = EngineConfig::from_lookup(|var| {
            (var == "QUIZ_AUTOSAVE_RETRY_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidMillis {
                var: "QUIZ_AUTOSAVE_RETRY_MS",
                value: "soon".into(),
            }
        );

        assert!(EngineConfig::from_lookup(|_| Some("0".into())).is_err());
    }
}
