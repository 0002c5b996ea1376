use std::fmt::Display;
use std::sync::Arc;

use http::StatusCode;
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Clone, Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
#[error(transparent)]
// The struct member is private so that every error goes through `new` and
// gets logged exactly once, at construction.
pub struct Error(Arc<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Arc::new(details))
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    /// The HTTP status code reported by the upstream API, if this error
    /// originated from a response.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.0.status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.0.is_retryable()
    }

    pub fn log(&self) {
        self.0.log();
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

// Expect for derive Serialize
#[expect(clippy::trivially_copy_pass_by_ref)]
fn serialize_status<S>(code: &Option<StatusCode>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match code {
        Some(c) => serializer.serialize_u16(c.as_u16()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ErrorDetails {
    Config {
        message: String,
    },
    /// The request envelope failed structural validation before dispatch.
    InvalidRequest {
        message: String,
    },
    /// The estimated token cost of a single request exceeds the configured
    /// per-minute token ceiling, so no amount of waiting can satisfy it.
    RequestTooLarge {
        custom_id: String,
        required_tokens: u64,
        max_tokens: u64,
    },
    /// The transport succeeded but the payload lacks the expected success
    /// shape (missing or empty `choices`). Never retried.
    ResponseFormat {
        custom_id: String,
        message: String,
    },
    /// A non-retryable upstream rejection (4xx other than 429).
    TransportClient {
        #[serde(serialize_with = "serialize_status")]
        status_code: Option<StatusCode>,
        message: String,
    },
    /// A transient upstream failure: 429, 5xx, timeout, or connection error.
    TransportServer {
        #[serde(serialize_with = "serialize_status")]
        status_code: Option<StatusCode>,
        message: String,
    },
    RetriesExhausted {
        custom_id: String,
        attempts: usize,
        message: String,
    },
    InternalError {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the level used when logging this error at construction.
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidRequest { .. } => tracing::Level::WARN,
            ErrorDetails::RequestTooLarge { .. } => tracing::Level::WARN,
            ErrorDetails::ResponseFormat { .. } => tracing::Level::WARN,
            ErrorDetails::TransportClient { .. } => tracing::Level::ERROR,
            ErrorDetails::TransportServer { .. } => tracing::Level::WARN,
            ErrorDetails::RetriesExhausted { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
        }
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ErrorDetails::TransportClient { status_code, .. }
            | ErrorDetails::TransportServer { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Whether the retry layer should attempt this request again. Only
    /// transient transport failures qualify; everything else either cannot
    /// succeed on retry or has already consumed its retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorDetails::TransportServer { .. })
    }

    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::Config { message } => {
                write!(f, "Invalid configuration: {message}")
            }
            ErrorDetails::InvalidRequest { message } => {
                write!(f, "Invalid request: {message}")
            }
            ErrorDetails::RequestTooLarge {
                custom_id,
                required_tokens,
                max_tokens,
            } => {
                write!(
                    f,
                    "Request `{custom_id}` requires {required_tokens} tokens, which exceeds the configured token limit of {max_tokens}"
                )
            }
            ErrorDetails::ResponseFormat { custom_id, message } => {
                write!(f, "Malformed response for request `{custom_id}`: {message}")
            }
            ErrorDetails::TransportClient {
                status_code,
                message,
            } => match status_code {
                Some(code) => write!(f, "API request rejected (status {code}): {message}"),
                None => write!(f, "API request rejected: {message}"),
            },
            ErrorDetails::TransportServer {
                status_code,
                message,
            } => match status_code {
                Some(code) => write!(f, "Transient API error (status {code}): {message}"),
                None => write!(f, "Transient API error: {message}"),
            },
            ErrorDetails::RetriesExhausted {
                custom_id,
                attempts,
                message,
            } => {
                write!(
                    f,
                    "Request `{custom_id}` failed after {attempts} attempts: {message}"
                )
            }
            ErrorDetails::InternalError { message } => {
                write!(f, "Internal error: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_error_serializes_status_as_number() {
        let error = Error::new(ErrorDetails::TransportServer {
            status_code: Some(StatusCode::SERVICE_UNAVAILABLE),
            message: "overloaded".to_string(),
        });
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(
            value,
            json!({
                "TransportServer": {
                    "status_code": 503,
                    "message": "overloaded",
                }
            })
        );
    }

    #[test]
    fn test_transport_error_without_status_serializes_null() {
        let details = ErrorDetails::TransportClient {
            status_code: None,
            message: "connection refused".to_string(),
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["TransportClient"]["status_code"], json!(null));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            ErrorDetails::TransportServer {
                status_code: Some(StatusCode::TOO_MANY_REQUESTS),
                message: "rate limited".to_string(),
            }
            .is_retryable()
        );
        assert!(
            ErrorDetails::TransportServer {
                status_code: None,
                message: "connection reset".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !ErrorDetails::TransportClient {
                status_code: Some(StatusCode::UNAUTHORIZED),
                message: "bad key".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !ErrorDetails::ResponseFormat {
                custom_id: "req-1".to_string(),
                message: "missing choices".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_retries_exhausted_display_carries_context() {
        let error = Error::new(ErrorDetails::RetriesExhausted {
            custom_id: "req-42".to_string(),
            attempts: 6,
            message: "Transient API error (status 503): overloaded".to_string(),
        });
        let rendered = error.to_string();
        assert!(rendered.contains("req-42"), "missing custom id: {rendered}");
        assert!(rendered.contains("6 attempts"), "missing attempts: {rendered}");
    }
}
