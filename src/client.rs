use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, ErrorDetails};
use crate::rate_limiting::RateLimiter;
use crate::retries::RetryConfig;
use crate::tokens::estimate_request_tokens;
use crate::transport::{HttpTransport, Transport};
use crate::types::{RequestEnvelope, ResponseEnvelope};

// Error bodies can be arbitrarily large; keep what's useful for logs.
const MAX_ERROR_BODY_LEN: usize = 2048;

/// A rate-limit-aware client for an OpenAI-compatible inference API.
///
/// One client owns one [`RateLimiter`]; every concurrently-running request
/// pipeline spawned from it shares that limiter, so aggregate consumption
/// stays within the configured (and server-reported) budgets. Cloning is
/// cheap and clones share the limiter.
#[derive(Clone)]
pub struct InferenceClient {
    config: Arc<ClientConfig>,
    rate_limiter: Arc<RateLimiter>,
    retry_config: RetryConfig,
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
}

impl InferenceClient {
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Constructs a client over a caller-supplied transport. This is the
    /// seam the test suite uses; production callers want [`Self::new`].
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let headers = build_static_headers(&config)?;
        let rate_limiter = Arc::new(RateLimiter::new(
            config.max_requests_per_minute,
            config.max_tokens_per_minute,
            config.max_sleep(),
        ));
        let retry_config = RetryConfig::new(config.max_retries, config.max_sleep());
        Ok(Self {
            config: Arc::new(config),
            rate_limiter,
            retry_config,
            transport,
            headers,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Runs the full pipeline for one request: estimate token cost, acquire
    /// budget, send, fold the response's rate-limit headers back into the
    /// limiter, validate the response shape, and retry transient transport
    /// failures with capped exponential backoff.
    #[instrument(skip_all, fields(custom_id = %envelope.custom_id))]
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope, Error> {
        envelope.validate()?;
        let method: Method = envelope.method.parse().map_err(|_| {
            Error::new(ErrorDetails::InvalidRequest {
                message: format!(
                    "invalid HTTP method `{}` for request `{}`",
                    envelope.method, envelope.custom_id
                ),
            })
        })?;
        let url = self.config.base_url.join(&envelope.url).map_err(|e| {
            Error::new(ErrorDetails::InvalidRequest {
                message: format!(
                    "invalid URL `{}` for request `{}`: {e}",
                    envelope.url, envelope.custom_id
                ),
            })
        })?;

        let required_tokens = estimate_request_tokens(&envelope.body)?;
        // A request costing more than the whole per-minute budget could
        // never be granted; fail fast instead of waiting forever.
        if let Some(max_tokens) = self.config.max_tokens_per_minute
            && required_tokens > max_tokens
        {
            return Err(Error::new(ErrorDetails::RequestTooLarge {
                custom_id: envelope.custom_id.clone(),
                required_tokens,
                max_tokens,
            }));
        }

        let attempts = AtomicUsize::new(1);
        let result = self
            .retry_config
            .retry(
                || self.dispatch_once(&method, &url, envelope, required_tokens),
                |error, delay| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        custom_id = %envelope.custom_id,
                        retry_in_ms = delay.as_millis() as u64,
                        %error,
                        "retrying after transient failure"
                    );
                },
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            // A retryable error surfacing here means the retry budget ran out.
            Err(error) if error.is_retryable() => {
                Err(Error::new(ErrorDetails::RetriesExhausted {
                    custom_id: envelope.custom_id.clone(),
                    attempts: attempts.load(Ordering::Relaxed),
                    message: error.to_string(),
                }))
            }
            Err(error) => Err(error),
        }
    }

    /// One attempt of the pipeline, without retry handling.
    async fn dispatch_once(
        &self,
        method: &Method,
        url: &Url,
        envelope: &RequestEnvelope,
        required_tokens: u64,
    ) -> Result<ResponseEnvelope, Error> {
        self.rate_limiter.acquire(required_tokens).await?;
        let response = self
            .transport
            .execute(
                method.clone(),
                url.clone(),
                Value::Object(envelope.body.clone()),
                self.headers.clone(),
            )
            .await?;

        // The headers reflect server truth whether the request succeeded,
        // was rate limited, or failed outright.
        self.rate_limiter.update_from_headers(&response.headers);

        let status = response.status;
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::new(ErrorDetails::TransportServer {
                status_code: Some(status),
                message: truncate_body(&response.body),
            }));
        }
        if !status.is_success() {
            return Err(Error::new(ErrorDetails::TransportClient {
                status_code: Some(status),
                message: truncate_body(&response.body),
            }));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            Error::new(ErrorDetails::ResponseFormat {
                custom_id: envelope.custom_id.clone(),
                message: format!("error parsing JSON response: {e}"),
            })
        })?;
        // Batch-format payloads nest the completion under `response`;
        // direct completions are the payload itself. Either way the
        // caller's `custom_id` wins over anything in the body.
        let response_value = match body {
            Value::Object(mut map) => match map.remove("response") {
                Some(inner) => inner,
                None => Value::Object(map),
            },
            other => other,
        };
        let result = ResponseEnvelope {
            custom_id: envelope.custom_id.clone(),
            response: response_value,
        };
        result.validate_shape()?;
        Ok(result)
    }
}

fn build_static_headers(config: &ClientConfig) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    let mut authorization =
        HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret())).map_err(
            |_| {
                Error::new(ErrorDetails::Config {
                    message: "`api_key` contains characters not valid in a header".to_string(),
                })
            },
        )?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LEN {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}… ({} bytes total)", &body[..end], body.len())
    }
}
