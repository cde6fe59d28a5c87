//! Engine configuration

use crate::constants::*;
use crate::error::{ConfigError, RowcallError, RowcallResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// ERROR HANDLING POLICY
// ============================================================================

/// What to do when a call fails with a declared error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Abort the whole run on the first failure.
    #[default]
    Fail,
    /// Record the failure on the unit and keep going.
    Log,
}

impl ErrorHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorHandling::Fail => "fail",
            ErrorHandling::Log => "log",
        }
    }
}

impl fmt::Display for ErrorHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorHandling {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(ErrorHandling::Fail),
            "log" => Ok(ErrorHandling::Log),
            other => Err(ConfigError::InvalidValue {
                field: "error_handling".to_string(),
                value: other.to_string(),
                reason: "expected 'fail' or 'log'".to_string(),
            }),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Options for one parallelized invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum calls in flight at once.
    pub parallel_workers: usize,
    /// Whether the remote service accepts several units per call.
    pub api_support_batch: bool,
    pub batch_size: usize,
    pub error_handling: ErrorHandling,
    /// Prefix for generated output columns.
    pub column_prefix: String,
    /// Also emit the raw error column.
    pub verbose: bool,
    /// At most this many calls per `rate_limit_period_secs`.
    pub rate_limit_calls: Option<u32>,
    pub rate_limit_period_secs: Option<f64>,
    /// Total attempts per call, including the first.
    pub retry_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_backoff_multiplier: f64,
    /// Per-attempt timeout. Expiry counts as a transient failure.
    pub call_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_workers: DEFAULT_PARALLEL_WORKERS,
            api_support_batch: false,
            batch_size: DEFAULT_BATCH_SIZE,
            error_handling: ErrorHandling::default(),
            column_prefix: DEFAULT_COLUMN_PREFIX.to_string(),
            verbose: false,
            rate_limit_calls: None,
            rate_limit_period_secs: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_backoff_ms: DEFAULT_RETRY_INITIAL_BACKOFF_MS,
            retry_max_backoff_ms: DEFAULT_RETRY_MAX_BACKOFF_MS,
            retry_backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
            call_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    ///
    /// Returns an error if any value is out of range or if the rate limit is
    /// only half specified.
    pub fn validate(&self) -> RowcallResult<()> {
        if self.parallel_workers == 0 {
            return Err(invalid(
                "parallel_workers",
                self.parallel_workers,
                "parallel_workers must be greater than 0",
            ));
        }

        if self.batch_size == 0 {
            return Err(invalid(
                "batch_size",
                self.batch_size,
                "batch_size must be greater than 0",
            ));
        }

        if self.column_prefix.trim().is_empty() {
            return Err(invalid(
                "column_prefix",
                &self.column_prefix,
                "column_prefix must not be empty",
            ));
        }

        if self.retry_attempts == 0 {
            return Err(invalid(
                "retry_attempts",
                self.retry_attempts,
                "retry_attempts must be at least 1",
            ));
        }

        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry_backoff_multiplier",
                self.retry_backoff_multiplier,
                "retry_backoff_multiplier must be a finite number >= 1.0",
            ));
        }

        if self.retry_max_backoff_ms < self.retry_initial_backoff_ms {
            return Err(invalid(
                "retry_max_backoff_ms",
                self.retry_max_backoff_ms,
                "retry_max_backoff_ms must be >= retry_initial_backoff_ms",
            ));
        }

        match (self.rate_limit_calls, self.rate_limit_period_secs) {
            (None, None) => {}
            (Some(_), None) => {
                return Err(ConfigError::MissingRequired {
                    field: "rate_limit_period_secs".to_string(),
                }
                .into())
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingRequired {
                    field: "rate_limit_calls".to_string(),
                }
                .into())
            }
            (Some(calls), Some(period)) => {
                if calls == 0 {
                    return Err(invalid(
                        "rate_limit_calls",
                        calls,
                        "rate_limit_calls must be greater than 0",
                    ));
                }
                if !period.is_finite() || period <= 0.0 {
                    return Err(invalid(
                        "rate_limit_period_secs",
                        period,
                        "rate_limit_period_secs must be a positive number",
                    ));
                }
                if Duration::try_from_secs_f64(period).is_err() {
                    return Err(invalid(
                        "rate_limit_period_secs",
                        period,
                        "rate_limit_period_secs is too large",
                    ));
                }
            }
        }

        if self.call_timeout_ms == Some(0) {
            return Err(invalid(
                "call_timeout_ms",
                0,
                "call_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    /// The configured quota as (calls, period), when one is set.
    ///
    /// Fails for a period that is not a positive, representable duration.
    pub fn rate_limit(&self) -> RowcallResult<Option<(u32, Duration)>> {
        match (self.rate_limit_calls, self.rate_limit_period_secs) {
            (Some(calls), Some(period)) => {
                if period <= 0.0 {
                    return Err(invalid(
                        "rate_limit_period_secs",
                        period,
                        "rate_limit_period_secs must be a positive number",
                    ));
                }
                let period = Duration::try_from_secs_f64(period).map_err(|e| {
                    invalid("rate_limit_period_secs", period, &e.to_string())
                })?;
                Ok(Some((calls, period)))
            }
            _ => Ok(None),
        }
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_initial_backoff_ms)
    }

    pub fn retry_max_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_max_backoff_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Create configuration from environment variables.
    ///
    /// Unset variables take their defaults; a variable that is set but does
    /// not parse is an error.
    ///
    /// Environment variables:
    /// - `ROWCALL_PARALLEL_WORKERS`: Calls in flight at once (default: 4)
    /// - `ROWCALL_API_SUPPORT_BATCH`: Send batches instead of single rows (default: false)
    /// - `ROWCALL_BATCH_SIZE`: Units per batch (default: 10)
    /// - `ROWCALL_ERROR_HANDLING`: `fail` or `log` (default: fail)
    /// - `ROWCALL_COLUMN_PREFIX`: Prefix for output columns (default: api)
    /// - `ROWCALL_VERBOSE`: Emit the raw error column (default: false)
    /// - `ROWCALL_RATE_LIMIT_CALLS`: Calls allowed per period (default: unset)
    /// - `ROWCALL_RATE_LIMIT_PERIOD_SECS`: Length of the rate limit period (default: unset)
    /// - `ROWCALL_RETRY_ATTEMPTS`: Total attempts per call (default: 5)
    /// - `ROWCALL_RETRY_INITIAL_BACKOFF_MS`: First retry delay (default: 1000)
    /// - `ROWCALL_RETRY_MAX_BACKOFF_MS`: Retry delay cap (default: 30000)
    /// - `ROWCALL_RETRY_BACKOFF_MULTIPLIER`: Delay growth factor (default: 2.0)
    /// - `ROWCALL_CALL_TIMEOUT_MS`: Per-attempt timeout (default: unset)
    pub fn from_env() -> RowcallResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RowcallResult<Self> {
        let defaults = Self::default();
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        Ok(Self {
            parallel_workers: parse_var(&var, "PARALLEL_WORKERS")?
                .unwrap_or(defaults.parallel_workers),
            api_support_batch: parse_var(&var, "API_SUPPORT_BATCH")?
                .unwrap_or(defaults.api_support_batch),
            batch_size: parse_var(&var, "BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            error_handling: parse_var(&var, "ERROR_HANDLING")?
                .unwrap_or(defaults.error_handling),
            column_prefix: var("COLUMN_PREFIX")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.column_prefix),
            verbose: parse_var(&var, "VERBOSE")?.unwrap_or(defaults.verbose),
            rate_limit_calls: parse_var(&var, "RATE_LIMIT_CALLS")?,
            rate_limit_period_secs: parse_var(&var, "RATE_LIMIT_PERIOD_SECS")?,
            retry_attempts: parse_var(&var, "RETRY_ATTEMPTS")?.unwrap_or(defaults.retry_attempts),
            retry_initial_backoff_ms: parse_var(&var, "RETRY_INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.retry_initial_backoff_ms),
            retry_max_backoff_ms: parse_var(&var, "RETRY_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.retry_max_backoff_ms),
            retry_backoff_multiplier: parse_var(&var, "RETRY_BACKOFF_MULTIPLIER")?
                .unwrap_or(defaults.retry_backoff_multiplier),
            call_timeout_ms: parse_var(&var, "CALL_TIMEOUT_MS")?,
        })
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> RowcallResult<Self> {
        toml::from_str(text).map_err(|e| {
            RowcallError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Read and parse a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> RowcallResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RowcallError::Config(ConfigError::Parse {
                reason: format!("{}: {}", path.display(), e),
            })
        })?;
        Self::from_toml_str(&text)
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, suffix: &str) -> RowcallResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(suffix) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| {
            invalid(
                &format!("{}{}", ENV_PREFIX, suffix),
                &raw,
                &e.to_string(),
            )
        }),
    }
}

fn invalid(field: &str, value: impl fmt::Display, reason: &str) -> RowcallError {
    RowcallError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn assert_invalid_field(config: &EngineConfig, expected: &str) {
        match config.validate() {
            Err(RowcallError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, expected)
            }
            other => panic!("expected InvalidValue for {}, got {:?}", expected, other),
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.parallel_workers, 4);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.error_handling, ErrorHandling::Fail);
        assert_eq!(config.column_prefix, "api");
        assert!(config.rate_limit().unwrap().is_none());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig {
            parallel_workers: 0,
            ..Default::default()
        };
        assert_invalid_field(&config, "parallel_workers");
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_invalid_field(&config, "batch_size");
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = EngineConfig {
            column_prefix: "  ".to_string(),
            ..Default::default()
        };
        assert_invalid_field(&config, "column_prefix");
    }

    #[test]
    fn test_validate_rejects_backoff_inversion() {
        let config = EngineConfig {
            retry_initial_backoff_ms: 5_000,
            retry_max_backoff_ms: 100,
            ..Default::default()
        };
        assert_invalid_field(&config, "retry_max_backoff_ms");
    }

    #[test]
    fn test_validate_rejects_small_multiplier() {
        let config = EngineConfig {
            retry_backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert_invalid_field(&config, "retry_backoff_multiplier");
    }

    #[test]
    fn test_validate_requires_both_rate_limit_fields() {
        let config = EngineConfig {
            rate_limit_calls: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RowcallError::Config(ConfigError::MissingRequired { field }))
                if field == "rate_limit_period_secs"
        ));

        let config = EngineConfig {
            rate_limit_period_secs: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RowcallError::Config(ConfigError::MissingRequired { field }))
                if field == "rate_limit_calls"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rate_limit_values() {
        let config = EngineConfig {
            rate_limit_calls: Some(0),
            rate_limit_period_secs: Some(1.0),
            ..Default::default()
        };
        assert_invalid_field(&config, "rate_limit_calls");

        let config = EngineConfig {
            rate_limit_calls: Some(3),
            rate_limit_period_secs: Some(-1.0),
            ..Default::default()
        };
        assert_invalid_field(&config, "rate_limit_period_secs");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = EngineConfig {
            call_timeout_ms: Some(0),
            ..Default::default()
        };
        assert_invalid_field(&config, "call_timeout_ms");
    }

    #[test]
    fn test_rate_limit_duration() {
        let config = EngineConfig {
            rate_limit_calls: Some(2),
            rate_limit_period_secs: Some(0.5),
            ..Default::default()
        };
        assert_eq!(
            config.rate_limit().unwrap(),
            Some((2, Duration::from_millis(500)))
        );
    }

    #[test]
    fn test_validate_rejects_unrepresentable_period() {
        let config = EngineConfig {
            rate_limit_calls: Some(3),
            rate_limit_period_secs: Some(1e30),
            ..Default::default()
        };
        assert_invalid_field(&config, "rate_limit_period_secs");
        assert!(matches!(
            config.rate_limit(),
            Err(RowcallError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_unset_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ROWCALL_PARALLEL_WORKERS", " 12 "),
            ("ROWCALL_ERROR_HANDLING", "log"),
            ("ROWCALL_RATE_LIMIT_CALLS", "5"),
            ("ROWCALL_RATE_LIMIT_PERIOD_SECS", "2.5"),
            ("ROWCALL_COLUMN_PREFIX", "nlp"),
        ]))
        .unwrap();
        assert_eq!(config.parallel_workers, 12);
        assert_eq!(config.error_handling, ErrorHandling::Log);
        assert_eq!(config.rate_limit_calls, Some(5));
        assert_eq!(config.rate_limit_period_secs, Some(2.5));
        assert_eq!(config.column_prefix, "nlp");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_from_lookup_rejects_unparsable_values() {
        for (key, value) in [
            ("ROWCALL_ERROR_HANDLING", "lgo"),
            ("ROWCALL_PARALLEL_WORKERS", "1OO"),
            ("ROWCALL_VERBOSE", "yes"),
            ("ROWCALL_CALL_TIMEOUT_MS", "-1"),
        ] {
            match EngineConfig::from_lookup(lookup(&[(key, value)])) {
                Err(RowcallError::Config(ConfigError::InvalidValue { field, value: got, .. })) => {
                    assert_eq!(field, key);
                    assert_eq!(got, value);
                }
                other => panic!("expected InvalidValue for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_error_handling_from_str() {
        assert_eq!("LOG".parse::<ErrorHandling>().unwrap(), ErrorHandling::Log);
        assert_eq!(" fail ".parse::<ErrorHandling>().unwrap(), ErrorHandling::Fail);
        assert!("ignore".parse::<ErrorHandling>().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EngineConfig::from_toml_str(
            r#"
            parallel_workers = 8
            error_handling = "log"
            rate_limit_calls = 100
            rate_limit_period_secs = 60.0
            "#,
        )
        .unwrap();
        assert_eq!(config.parallel_workers, 8);
        assert_eq!(config.error_handling, ErrorHandling::Log);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("workers = 3").unwrap_err();
        assert!(matches!(err, RowcallError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = EngineConfig::from_path("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("here.toml"));
    }
}
