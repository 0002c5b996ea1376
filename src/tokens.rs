//! Prompt token estimation for chat completion request bodies.
//!
//! The estimate feeds the rate limiter's token budget before a request is
//! sent; the server's response headers then correct any drift, so this only
//! has to be close, not exact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Map, Value};
use tiktoken_rs::CoreBPE;

use crate::error::{Error, ErrorDetails};

/// Per-message framing overhead (role and separators), per OpenAI's
/// published counting rules for chat models.
const TOKENS_PER_MESSAGE: u64 = 4;
/// Every reply is primed with an implicit assistant prefix.
const REPLY_PRIMING_TOKENS: u64 = 2;

static BPE_CACHE: OnceLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = OnceLock::new();

/// Estimates the prompt token cost of a request body as a pure function of
/// its `messages` and `model` fields. Bodies without a `messages` array
/// (e.g. non-chat endpoints) cost zero tokens against the token budget.
pub fn estimate_request_tokens(body: &Map<String, Value>) -> Result<u64, Error> {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return Ok(0);
    };
    let model = body.get("model").and_then(Value::as_str).unwrap_or("");
    let bpe = bpe_for_model(model)?;

    let mut total = REPLY_PRIMING_TOKENS;
    for message in messages {
        total += TOKENS_PER_MESSAGE;
        if let Some(role) = message.get("role").and_then(Value::as_str) {
            total += bpe.encode_with_special_tokens(role).len() as u64;
        }
        if let Some(content) = message.get("content").and_then(Value::as_str) {
            total += bpe.encode_with_special_tokens(content).len() as u64;
        }
    }
    Ok(total)
}

/// Returns the tokenizer for `model`, falling back to `o200k_base` for
/// models tiktoken doesn't know. Encoders are expensive to construct, so
/// they are cached per model name for the life of the process.
fn bpe_for_model(model: &str) -> Result<Arc<CoreBPE>, Error> {
    let cache = BPE_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().map_err(|_| {
        Error::new(ErrorDetails::InternalError {
            message: "tokenizer cache mutex poisoned".to_string(),
        })
    })?;
    if let Some(bpe) = cache.get(model) {
        return Ok(bpe.clone());
    }
    let bpe = tiktoken_rs::get_bpe_from_model(model)
        .or_else(|_| tiktoken_rs::o200k_base())
        .map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("failed to load tokenizer for model `{model}`: {e}"),
            })
        })?;
    let bpe = Arc::new(bpe);
    cache.insert(model.to_string(), bpe.clone());
    Ok(bpe)
}
