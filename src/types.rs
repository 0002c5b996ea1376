use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorDetails};

/// One caller-supplied request to dispatch. Immutable once handed to the
/// client; `custom_id` is the caller's correlation key and is carried
/// through to the matching [`ResponseEnvelope`] unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestEnvelope {
    pub custom_id: String,
    pub method: String,
    /// Resolved against the configured base URL, so relative paths like
    /// `/v1/chat/completions` work.
    pub url: String,
    /// Using a JSON map (rather than `Value`) rejects non-object bodies at
    /// the type level.
    pub body: Map<String, Value>,
}

impl RequestEnvelope {
    /// Parses and validates an envelope from loose JSON, reporting
    /// structural violations before any network activity.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let envelope: RequestEnvelope = serde_json::from_value(value).map_err(|e| {
            Error::new(ErrorDetails::InvalidRequest {
                message: e.to_string(),
            })
        })?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.custom_id.is_empty() {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: "`custom_id` must be non-empty".to_string(),
            }));
        }
        if self.method.is_empty() {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: format!("`method` must be non-empty for request `{}`", self.custom_id),
            }));
        }
        if self.url.is_empty() {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: format!("`url` must be non-empty for request `{}`", self.custom_id),
            }));
        }
        Ok(())
    }
}

/// The validated outcome of one request: the raw API response body keyed by
/// the originating request's `custom_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub custom_id: String,
    pub response: Value,
}

impl ResponseEnvelope {
    /// Checks the success shape: the response must carry a non-empty
    /// `choices` array. Anything else is a response-format error for this
    /// request, distinct from a transport failure and never retried.
    pub fn validate_shape(&self) -> Result<(), Error> {
        match self.response.get("choices") {
            Some(Value::Array(choices)) if !choices.is_empty() => Ok(()),
            Some(Value::Array(_)) => Err(Error::new(ErrorDetails::ResponseFormat {
                custom_id: self.custom_id.clone(),
                message: "`choices` is empty".to_string(),
            })),
            Some(_) => Err(Error::new(ErrorDetails::ResponseFormat {
                custom_id: self.custom_id.clone(),
                message: "`choices` is not an array".to_string(),
            })),
            None => Err(Error::new(ErrorDetails::ResponseFormat {
                custom_id: self.custom_id.clone(),
                message: "response is missing `choices`".to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_from_valid_value() {
        let envelope = RequestEnvelope::from_value(json!({
            "custom_id": "req_123",
            "method": "POST",
            "url": "/v1/chat/completions",
            "body": {"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "Hello"}]},
        }))
        .unwrap();
        assert_eq!(envelope.custom_id, "req_123");
        assert_eq!(envelope.method, "POST");
    }

    #[test]
    fn test_request_envelope_allows_empty_and_nested_bodies() {
        RequestEnvelope::from_value(json!({
            "custom_id": "req_123",
            "method": "GET",
            "url": "/v1/models",
            "body": {},
        }))
        .unwrap();
        RequestEnvelope::from_value(json!({
            "custom_id": "req_123",
            "method": "POST",
            "url": "/v1/chat/completions",
            "body": {
                "string": "value",
                "number": 123,
                "bool": true,
                "list": [1, 2, 3],
                "nested": {"key": "value"},
            },
        }))
        .unwrap();
    }

    #[test]
    fn test_request_envelope_rejects_missing_fields() {
        let err = RequestEnvelope::from_value(json!({"custom_id": "req_123"})).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidRequest { .. }
        ));
    }

    #[test]
    fn test_request_envelope_rejects_wrong_types() {
        for value in [
            json!({"custom_id": 123, "method": "POST", "url": "/v1", "body": {}}),
            json!({"custom_id": "a", "method": 7, "url": "/v1", "body": {}}),
            json!({"custom_id": "a", "method": "POST", "url": "/v1", "body": ["not", "an", "object"]}),
            json!({"custom_id": "a", "method": "POST", "url": "/v1", "body": "invalid"}),
        ] {
            let err = RequestEnvelope::from_value(value).unwrap_err();
            assert!(matches!(
                err.get_details(),
                ErrorDetails::InvalidRequest { .. }
            ));
        }
    }

    #[test]
    fn test_response_shape_validation() {
        let valid = ResponseEnvelope {
            custom_id: "req-1".to_string(),
            response: json!({"choices": [{"message": {"role": "assistant", "content": "Hi"}}]}),
        };
        valid.validate_shape().unwrap();

        for response in [json!({}), json!({"choices": []}), json!({"choices": "nope"})] {
            let envelope = ResponseEnvelope {
                custom_id: "req-1".to_string(),
                response,
            };
            let err = envelope.validate_shape().unwrap_err();
            assert!(matches!(
                err.get_details(),
                ErrorDetails::ResponseFormat { custom_id, .. } if custom_id == "req-1"
            ));
        }
    }
}
