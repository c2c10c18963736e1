#![forbid(unsafe_code)]

//! Dispatch configuration.
//!
//! # Environment
//!
//! | Variable | Field | Accepted values |
//! |---|---|---|
//! | `COURIER_STRICT` | `failure_policy` | `1/0/true/false/yes/no/on/off` |
//! | `COURIER_SWEEP_THRESHOLD` | `sweep_threshold` | positive integer |
//!
//! The main thread cannot come from the environment; set it with
//! [`DispatchConfig::with_main_thread`] from the thread that owns the UI or
//! event loop.

use std::env;
use std::fmt;
use std::thread::ThreadId;

const ENV_STRICT: &str = "COURIER_STRICT";
const ENV_SWEEP_THRESHOLD: &str = "COURIER_SWEEP_THRESHOLD";

/// Subscriber count above which a set sweeps dead owners on insert.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 60;

/// What to do with handler panics, field-access failures and thread
/// discipline violations after they are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Re-raise. Programmer errors surface immediately.
    Strict,
    /// Swallow so one failing subscriber never blocks its siblings.
    Lenient,
}

impl FailurePolicy {
    /// `Strict` in debug builds, `Lenient` in release builds.
    #[must_use]
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }

    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::for_build()
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        })
    }
}

/// Configuration shared by a dispatcher and all of its subscriber sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Escalation policy for failures local to one subscriber or field.
    pub failure_policy: FailurePolicy,
    /// Set size above which an insert triggers a dead-owner sweep.
    pub sweep_threshold: usize,
    /// Thread that `FORCE_MAIN_THREAD` channels must be delivered on.
    /// `None` disables the check.
    pub main_thread: Option<ThreadId>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::for_build(),
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            main_thread: None,
        }
    }
}

/// Configuration parse diagnostics.
#[derive(Debug, Clone)]
pub struct DispatchConfigParse {
    pub config: DispatchConfig,
    pub errors: Vec<ConfigError>,
}

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl DispatchConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn strict(self) -> Self {
        self.with_failure_policy(FailurePolicy::Strict)
    }

    #[must_use]
    pub fn lenient(self) -> Self {
        self.with_failure_policy(FailurePolicy::Lenient)
    }

    #[must_use]
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_main_thread(mut self, thread: ThreadId) -> Self {
        self.main_thread = Some(thread);
        self
    }

    /// Parse config from environment variables, ignoring bad values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> DispatchConfigParse {
        from_env_with(|key| env::var(key).ok())
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.sweep_threshold == 0 {
            errors.push(ConfigError::new(
                "sweep_threshold",
                "0",
                "must be greater than zero",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn from_env_with<F>(mut get: F) -> DispatchConfigParse
where
    F: FnMut(&str) -> Option<String>,
{
    let mut config = DispatchConfig::default();
    let mut errors = Vec::new();

    if let Some(value) = get(ENV_STRICT) {
        match parse_bool(&value) {
            Some(true) => config.failure_policy = FailurePolicy::Strict,
            Some(false) => config.failure_policy = FailurePolicy::Lenient,
            None => errors.push(ConfigError::new(
                "failure_policy",
                value,
                "expected bool (1/0/true/false)",
            )),
        }
    }

    if let Some(value) = get(ENV_SWEEP_THRESHOLD) {
        match parse_usize(&value) {
            Some(parsed) if parsed > 0 => config.sweep_threshold = parsed,
            _ => errors.push(ConfigError::new(
                "sweep_threshold",
                value,
                "expected positive integer",
            )),
        }
    }

    DispatchConfigParse { config, errors }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[inline]
fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(vars: &[(&str, &str)]) -> DispatchConfigParse {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        from_env_with(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.sweep_threshold, DEFAULT_SWEEP_THRESHOLD);
        assert_eq!(config.failure_policy, FailurePolicy::for_build());
        assert!(config.main_thread.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let parsed = parse(&[("COURIER_STRICT", "off"), ("COURIER_SWEEP_THRESHOLD", " 8 ")]);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.config.failure_policy, FailurePolicy::Lenient);
        assert_eq!(parsed.config.sweep_threshold, 8);
    }

    #[test]
    fn bad_env_values_are_reported_and_ignored() {
        let parsed = parse(&[("COURIER_STRICT", "maybe"), ("COURIER_SWEEP_THRESHOLD", "0")]);
        assert_eq!(parsed.errors.len(), 2);
        assert_eq!(parsed.errors[0].field, "failure_policy");
        assert_eq!(parsed.errors[1].field, "sweep_threshold");
        assert_eq!(parsed.config.sweep_threshold, DEFAULT_SWEEP_THRESHOLD);
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let errors = DispatchConfig::new()
            .with_sweep_threshold(0)
            .validate()
            .unwrap_err();
        assert_eq!(errors[0].to_string(), "sweep_threshold=0 (must be greater than zero)");
    }
}
