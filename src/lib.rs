//! A rate-limit-aware batch dispatch client for OpenAI-compatible
//! inference APIs.
//!
//! The crate manages two server-enforced budgets (requests per minute and
//! tokens per minute) on the client side: each request's token cost is
//! estimated up front, capacity is acquired atomically from a shared
//! [`RateLimiter`], and the server's `x-ratelimit-*` response headers are
//! folded back in as the authoritative view of remaining capacity.
//! Transient failures (429, 5xx, timeouts) are retried with capped
//! exponential backoff; batches fan out under a concurrency cap with
//! per-request failure isolation and input-order results.
//!
//! ```no_run
//! use openai_dispatch::{ClientConfig, InferenceClient, RequestEnvelope};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), openai_dispatch::Error> {
//! let client = InferenceClient::new(ClientConfig::new("sk-..."))?;
//! let request = RequestEnvelope::from_value(json!({
//!     "custom_id": "req-1",
//!     "method": "POST",
//!     "url": "/v1/chat/completions",
//!     "body": {
//!         "model": "gpt-4o-mini",
//!         "messages": [{"role": "user", "content": "Hello"}],
//!     },
//! }))?;
//! let results = client.process_batch(vec![request]).await;
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod config;
mod error;
mod rate_limiting;
mod retries;
mod tokens;
mod transport;
mod types;

pub use client::InferenceClient;
pub use config::ClientConfig;
pub use error::{Error, ErrorDetails};
pub use rate_limiting::{
    RateLimiter, REMAINING_REQUESTS_HEADER, REMAINING_TOKENS_HEADER, RESET_REQUESTS_HEADER,
    RESET_TOKENS_HEADER,
};
pub use retries::RetryConfig;
pub use tokens::estimate_request_tokens;
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use types::{RequestEnvelope, ResponseEnvelope};
