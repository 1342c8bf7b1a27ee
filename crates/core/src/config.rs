//! Engine configuration.
//!
//! All timing knobs have defaults suitable for production; `from_env` lets a
//! deployment override them through `PARLEY_*` environment variables.

use crate::retry::RetryPolicy;
use secrecy::SecretString;
use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Timers used by the readiness detector.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadinessTiming {
    /// Upper bound on how long to wait for an audio-capable agent.
    pub grace_period: Duration,
    /// How often participant state is re-checked while waiting.
    pub poll_interval: Duration,
}

impl Default for ReadinessTiming {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Timing and retry configuration for a session controller.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub readiness: ReadinessTiming,
    /// How long the handshake waits for the data channel before sending anyway.
    pub data_channel_timeout: Duration,
    /// How long after the last agent audio fragment the agent counts as silent.
    pub speaking_timeout: Duration,
    /// Deadline for the whole connect -> ready -> handshake sequence.
    pub start_timeout: Duration,
    /// Delivery policy for the init message.
    pub init_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessTiming::default(),
            data_channel_timeout: Duration::from_secs(2),
            speaking_timeout: Duration::from_millis(1500),
            start_timeout: Duration::from_secs(20),
            init_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let defaults = Self::default();
        let readiness = ReadinessTiming {
            grace_period: env_millis("PARLEY_READY_GRACE_MS", defaults.readiness.grace_period)?,
            poll_interval: env_millis("PARLEY_READY_POLL_MS", defaults.readiness.poll_interval)?,
        };
        if readiness.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PARLEY_READY_POLL_MS".to_string(),
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let max_attempts = match std::env::var("PARLEY_INIT_MAX_ATTEMPTS") {
            Ok(raw) => raw.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PARLEY_INIT_MAX_ATTEMPTS".to_string(),
                    format!("'{}' is not a positive integer", raw),
                )
            })?,
            Err(_) => defaults.init_retry.max_attempts,
        };
        let base_delay = env_millis("PARLEY_INIT_BACKOFF_MS", defaults.init_retry.base_delay)?;
        if base_delay.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PARLEY_INIT_BACKOFF_MS".to_string(),
                "backoff must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            readiness,
            data_channel_timeout: env_millis(
                "PARLEY_DATA_CHANNEL_TIMEOUT_MS",
                defaults.data_channel_timeout,
            )?,
            speaking_timeout: env_millis("PARLEY_SPEAKING_TIMEOUT_MS", defaults.speaking_timeout)?,
            start_timeout: env_millis("PARLEY_START_TIMEOUT_MS", defaults.start_timeout)?,
            init_retry: RetryPolicy {
                max_attempts,
                base_delay,
                ..defaults.init_retry
            },
        })
    }
}

/// Where credentials and conversations are served from.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// HTTPS base used for signed-URL requests.
    pub api_base: String,
    /// WebSocket base used for conversations.
    pub websocket_base: String,
    /// API key for private agents.
    pub api_key: Option<SecretString>,
}

impl EndpointConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base = std::env::var("PARLEY_API_BASE")
            .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string());
        let websocket_base = std::env::var("PARLEY_WS_BASE")
            .unwrap_or_else(|_| "wss://api.elevenlabs.io".to_string());

        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PARLEY_API_BASE".to_string(),
                format!("'{}' is not an http(s) URL", api_base),
            ));
        }
        if !websocket_base.starts_with("ws://") && !websocket_base.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "PARLEY_WS_BASE".to_string(),
                format!("'{}' is not a ws(s) URL", websocket_base),
            ));
        }

        let api_key = std::env::var("PARLEY_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            websocket_base: websocket_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn env_millis(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    var.to_string(),
                    format!("'{}' is not a number of milliseconds", raw),
                )
            }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("PARLEY_READY_GRACE_MS");
            env::remove_var("PARLEY_READY_POLL_MS");
            env::remove_var("PARLEY_DATA_CHANNEL_TIMEOUT_MS");
            env::remove_var("PARLEY_SPEAKING_TIMEOUT_MS");
            env::remove_var("PARLEY_START_TIMEOUT_MS");
            env::remove_var("PARLEY_INIT_MAX_ATTEMPTS");
            env::remove_var("PARLEY_INIT_BACKOFF_MS");
            env::remove_var("PARLEY_API_BASE");
            env::remove_var("PARLEY_WS_BASE");
            env::remove_var("PARLEY_API_KEY");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_engine_config_defaults() {
        clear_env_vars();

        let config = EngineConfig::from_env().expect("Config should load successfully");

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.readiness.grace_period, Duration::from_secs(3));
        assert_eq!(config.init_retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_engine_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_READY_GRACE_MS", "5000");
            env::set_var("PARLEY_READY_POLL_MS", "50");
            env::set_var("PARLEY_DATA_CHANNEL_TIMEOUT_MS", "750");
            env::set_var("PARLEY_SPEAKING_TIMEOUT_MS", "900");
            env::set_var("PARLEY_START_TIMEOUT_MS", "30000");
            env::set_var("PARLEY_INIT_MAX_ATTEMPTS", "5");
            env::set_var("PARLEY_INIT_BACKOFF_MS", "100");
        }

        let config = EngineConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.readiness.grace_period, Duration::from_secs(5));
        assert_eq!(config.readiness.poll_interval, Duration::from_millis(50));
        assert_eq!(config.data_channel_timeout, Duration::from_millis(750));
        assert_eq!(config.speaking_timeout, Duration::from_millis(900));
        assert_eq!(config.start_timeout, Duration::from_secs(30));
        assert_eq!(config.init_retry.max_attempts, 5);
        assert_eq!(config.init_retry.base_delay, Duration::from_millis(100));
        assert_eq!(
            config.init_retry.max_delay,
            RetryPolicy::default().max_delay
        );
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_engine_config_invalid_millis() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_READY_GRACE_MS", "soon");
        }

        let err = EngineConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PARLEY_READY_GRACE_MS"),
            _ => panic!("Expected InvalidValue for PARLEY_READY_GRACE_MS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_engine_config_rejects_zero_attempts() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_INIT_MAX_ATTEMPTS", "0");
        }

        let err = EngineConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PARLEY_INIT_MAX_ATTEMPTS"),
            _ => panic!("Expected InvalidValue for PARLEY_INIT_MAX_ATTEMPTS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_engine_config_rejects_zero_poll_interval() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_READY_POLL_MS", "0");
        }

        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "PARLEY_READY_POLL_MS"
        ));
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_endpoint_config_defaults_and_key() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_API_KEY", "secret-key");
            env::set_var("PARLEY_WS_BASE", "ws://localhost:8080/");
        }

        let config = EndpointConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.api_base, "https://api.elevenlabs.io");
        assert_eq!(config.websocket_base, "ws://localhost:8080");
        assert_eq!(
            config.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("secret-key".to_string())
        );
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_endpoint_config_invalid_scheme() {
        clear_env_vars();
        unsafe {
            env::set_var("PARLEY_WS_BASE", "https://not-a-socket");
        }

        let err = EndpointConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PARLEY_WS_BASE"),
            _ => panic!("Expected InvalidValue for PARLEY_WS_BASE"),
        }
        clear_env_vars();
    }
}
