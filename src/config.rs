use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, ErrorDetails};

/// Static client settings, immutable once the client is constructed.
///
/// The rate limit defaults match the published tier limits for
/// `/v1/chat/completions`; callers with a different tier should set them
/// explicitly so the limiter starts from the right ceiling (the server's
/// `x-ratelimit-*` headers will correct it after the first response either
/// way).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_key: SecretString,
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u64,
    /// Token budget per minute. `None` disables token tracking entirely.
    #[serde(default = "default_max_tokens_per_minute")]
    pub max_tokens_per_minute: Option<u64>,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Upper bound in seconds on any single limiter wait or backoff delay.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: f32,
}

fn default_base_url() -> Url {
    // Statically known to be a valid URL.
    #[expect(clippy::unwrap_used)]
    Url::parse("https://api.openai.com").unwrap()
}

fn default_max_requests_per_minute() -> u64 {
    5000
}

fn default_max_tokens_per_minute() -> Option<u64> {
    Some(15_000_000)
}

fn default_max_concurrent_requests() -> usize {
    250
}

fn default_max_retries() -> usize {
    5
}

fn default_max_sleep_secs() -> f32 {
    60.0
}

impl ClientConfig {
    /// Builds a config with the given API key and all defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: default_base_url(),
            max_requests_per_minute: default_max_requests_per_minute(),
            max_tokens_per_minute: default_max_tokens_per_minute(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            max_sleep_secs: default_max_sleep_secs(),
        }
    }

    /// Parses and validates a config from a JSON value, reporting every
    /// problem as `ErrorDetails::Config` before any client exists.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let config: ClientConfig = serde_json::from_value(value).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        use secrecy::ExposeSecret;
        if self.api_key.expose_secret().is_empty() {
            return Err(Error::new(ErrorDetails::Config {
                message: "`api_key` must be non-empty".to_string(),
            }));
        }
        if self.max_requests_per_minute == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`max_requests_per_minute` must be at least 1".to_string(),
            }));
        }
        if self.max_tokens_per_minute == Some(0) {
            return Err(Error::new(ErrorDetails::Config {
                message: "`max_tokens_per_minute` must be at least 1 when set".to_string(),
            }));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`max_concurrent_requests` must be at least 1".to_string(),
            }));
        }
        if !self.max_sleep_secs.is_finite() || self.max_sleep_secs <= 0.0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`max_sleep_secs` must be a positive number".to_string(),
            }));
        }
        Ok(())
    }

    pub fn max_sleep(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32(self.max_sleep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn test_config_with_explicit_values() {
        let config = ClientConfig::from_value(json!({
            "api_key": "test_key_123",
            "max_requests_per_minute": 6000,
            "max_tokens_per_minute": 16_000_000u64,
            "max_concurrent_requests": 300,
            "max_retries": 3,
            "max_sleep_secs": 30.0,
        }))
        .unwrap();

        assert_eq!(config.api_key.expose_secret(), "test_key_123");
        assert_eq!(config.max_requests_per_minute, 6000);
        assert_eq!(config.max_tokens_per_minute, Some(16_000_000));
        assert_eq!(config.max_concurrent_requests, 300);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_sleep_secs, 30.0);
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::from_value(json!({"api_key": "test_key_123"})).unwrap();

        assert_eq!(config.base_url.as_str(), "https://api.openai.com/");
        assert_eq!(config.max_requests_per_minute, 5000);
        assert_eq!(config.max_tokens_per_minute, Some(15_000_000));
        assert_eq!(config.max_concurrent_requests, 250);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_sleep_secs, 60.0);
    }

    #[test]
    fn test_config_missing_api_key() {
        let err = ClientConfig::from_value(json!({})).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::Config { .. }
        ));
    }

    #[test]
    fn test_config_invalid_types() {
        let err = ClientConfig::from_value(json!({
            "api_key": "k",
            "max_requests_per_minute": "not a number",
        }))
        .unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::Config { .. }));
    }

    #[test]
    fn test_config_null_token_limit_disables_tracking() {
        let config = ClientConfig::from_value(json!({
            "api_key": "k",
            "max_tokens_per_minute": null,
        }))
        .unwrap();
        assert_eq!(config.max_tokens_per_minute, None);
    }

    #[test]
    fn test_config_rejects_zero_limits() {
        for body in [
            json!({"api_key": "k", "max_requests_per_minute": 0}),
            json!({"api_key": "k", "max_tokens_per_minute": 0}),
            json!({"api_key": "k", "max_concurrent_requests": 0}),
            json!({"api_key": "k", "max_sleep_secs": 0.0}),
            json!({"api_key": ""}),
        ] {
            let err = ClientConfig::from_value(body).unwrap_err();
            assert!(matches!(err.get_details(), ErrorDetails::Config { .. }));
        }
    }
}
