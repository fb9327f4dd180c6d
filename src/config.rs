//! Configuration management for switchboard.
//!
//! Configuration can be set via environment variables:
//! - `SWITCHBOARD_DEFAULT_MODEL` - Optional. Model identifier passed to the gateway. Defaults to `default`.
//! - `SWITCHBOARD_MAX_TURNS` - Optional. Turn cap per agent loop. Defaults to `15`.
//! - `SWITCHBOARD_MAX_DELEGATION_DEPTH` - Optional. Deepest allowed delegation. Defaults to `5`.
//! - `SWITCHBOARD_MAX_PARALLEL_TOOLS` - Optional. Concurrent tool calls per executor. Defaults to `8`.
//! - `SWITCHBOARD_REQUEST_TIMEOUT_SECS` - Optional. Deadline for a whole request. Defaults to `300`.
//! - `SWITCHBOARD_SESSION_TTL_SECS` - Optional. Session inactivity TTL. Defaults to `3600`.
//! - `SWITCHBOARD_MODEL_TIMEOUT_SECS` - Optional. Budget for one model call. Defaults to `60`.
//! - `SWITCHBOARD_MODEL_MAX_ATTEMPTS` - Optional. Attempts per model call. Defaults to `3`.
//! - `SWITCHBOARD_TRACE_RETENTION` - Optional. Finished traces kept in memory. Defaults to `1000`.
//! - `SWITCHBOARD_TOOL_FAILURE_POLICY` - Optional. `feedback` or `abort`. Defaults to `feedback`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::llm::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// What the turn loop does when a tool call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolFailurePolicy {
    /// Report the failure to the model as an error tool result
    #[default]
    FeedBack,
    /// Abort the turn loop with the tool error
    Abort,
}

impl FromStr for ToolFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feedback" | "feed_back" | "feed-back" => Ok(Self::FeedBack),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown tool failure policy '{other}'")),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model identifier passed to the gateway
    pub default_model: String,

    /// Maximum model calls in one agent turn loop
    pub max_turns: usize,

    /// Maximum delegation depth (0 = routed agent)
    pub max_delegation_depth: usize,

    /// Concurrent tool calls per executor
    pub max_parallel_tools: usize,

    /// Deadline for one top-level request
    pub request_timeout: Duration,

    /// Session inactivity TTL
    pub session_ttl: Duration,

    /// Budget for a single model call
    pub model_timeout: Duration,

    /// Attempts per model completion, including the first
    pub model_max_attempts: u32,

    /// Tool rate-limit window
    pub rate_limit_window: Duration,

    /// Characters of session history included in prompts
    pub history_max_chars: usize,

    pub tool_failure_policy: ToolFailurePolicy,

    /// Traces kept by the default tracer, oldest evicted first
    pub trace_retention: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: "default".to_string(),
            max_turns: 15,
            max_delegation_depth: 5,
            max_parallel_tools: 8,
            request_timeout: Duration::from_secs(300),
            session_ttl: Duration::from_secs(3600),
            model_timeout: Duration::from_secs(60),
            model_max_attempts: 3,
            rate_limit_window: Duration::from_secs(60),
            history_max_chars: 8000,
            tool_failure_policy: ToolFailurePolicy::FeedBack,
            trace_retention: 1000,
        }
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables, defaulting anything unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_env::<u64>(name)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        let max_turns = parse_env("SWITCHBOARD_MAX_TURNS")?.unwrap_or(defaults.max_turns);
        if max_turns == 0 {
            return Err(ConfigError::InvalidValue(
                "SWITCHBOARD_MAX_TURNS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            default_model: std::env::var("SWITCHBOARD_DEFAULT_MODEL")
                .unwrap_or(defaults.default_model),
            max_turns,
            max_delegation_depth: parse_env("SWITCHBOARD_MAX_DELEGATION_DEPTH")?
                .unwrap_or(defaults.max_delegation_depth),
            max_parallel_tools: parse_env("SWITCHBOARD_MAX_PARALLEL_TOOLS")?
                .unwrap_or(defaults.max_parallel_tools),
            request_timeout: secs("SWITCHBOARD_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            session_ttl: secs("SWITCHBOARD_SESSION_TTL_SECS", defaults.session_ttl)?,
            model_timeout: secs("SWITCHBOARD_MODEL_TIMEOUT_SECS", defaults.model_timeout)?,
            model_max_attempts: parse_env("SWITCHBOARD_MODEL_MAX_ATTEMPTS")?
                .unwrap_or(defaults.model_max_attempts),
            rate_limit_window: defaults.rate_limit_window,
            history_max_chars: defaults.history_max_chars,
            tool_failure_policy: parse_env("SWITCHBOARD_TOOL_FAILURE_POLICY")?
                .unwrap_or(defaults.tool_failure_policy),
            trace_retention: parse_env("SWITCHBOARD_TRACE_RETENTION")?
                .unwrap_or(defaults.trace_retention),
        })
    }

    /// Gateway retry settings derived from this config.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.model_max_attempts.max(1),
            call_timeout: self.model_timeout,
            ..RetryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_turns, 15);
        assert_eq!(config.max_delegation_depth, 5);
        assert_eq!(config.tool_failure_policy, ToolFailurePolicy::FeedBack);
        assert_eq!(config.retry_config().max_attempts, 3);
        assert_eq!(config.trace_retention, 1000);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Abort".parse::<ToolFailurePolicy>(), Ok(ToolFailurePolicy::Abort));
        assert_eq!("feedback".parse::<ToolFailurePolicy>(), Ok(ToolFailurePolicy::FeedBack));
        assert!("retry".parse::<ToolFailurePolicy>().is_err());
    }

    // The only test that touches the process environment.
    #[test]
    fn test_from_env() {
        std::env::set_var("SWITCHBOARD_MAX_TURNS", "4");
        std::env::set_var("SWITCHBOARD_TOOL_FAILURE_POLICY", "abort");
        std::env::set_var("SWITCHBOARD_REQUEST_TIMEOUT_SECS", "9");
        let config = Config::from_env().unwrap();
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.tool_failure_policy, ToolFailurePolicy::Abort);
        assert_eq!(config.request_timeout, Duration::from_secs(9));

        std::env::set_var("SWITCHBOARD_MAX_TURNS", "many");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(name, _)) if name == "SWITCHBOARD_MAX_TURNS"
        ));

        for name in [
            "SWITCHBOARD_MAX_TURNS",
            "SWITCHBOARD_TOOL_FAILURE_POLICY",
            "SWITCHBOARD_REQUEST_TIMEOUT_SECS",
        ] {
            std::env::remove_var(name);
        }
    }
}
