use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::error::{Error, ErrorDetails};

// Set high enough that it should never be hit for a normal model response;
// slow requests are governed by the rate limiter and retry policy instead.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One HTTP exchange as seen by the dispatch pipeline: status, headers, and
/// the raw body for *any* status code. Status classification (retryable or
/// not) is the orchestrator's job, not the transport's.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// The seam between the dispatch pipeline and the network. Errors are
/// reserved for transport-level failures (connection refused, timeout);
/// an HTTP response with any status is an `Ok` value.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Value,
        headers: HeaderMap,
    ) -> Result<TransportResponse, Error>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("failed to build HTTP client: {e}"),
                })
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Value,
        headers: HeaderMap,
    ) -> Result<TransportResponse, Error> {
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Connection-level failures are transient by definition.
                let message = if e.is_timeout() {
                    format!("request timed out: {e}")
                } else {
                    format!("error sending request: {e}")
                };
                Error::new(ErrorDetails::TransportServer {
                    status_code: e.status(),
                    message,
                })
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| {
            Error::new(ErrorDetails::TransportServer {
                status_code: Some(status),
                message: format!("error reading response body: {e}"),
            })
        })?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
