//! Client-side admission control for the two server-enforced budgets:
//! requests per minute and tokens per minute.
//!
//! The server's `x-ratelimit-*` response headers are authoritative: local
//! bookkeeping only has to be good enough to avoid tripping the server
//! limit between responses, and is overwritten whenever feedback arrives.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use http::HeaderMap;

use crate::error::{Error, ErrorDetails};

pub const REMAINING_REQUESTS_HEADER: &str = "x-ratelimit-remaining-requests";
pub const REMAINING_TOKENS_HEADER: &str = "x-ratelimit-remaining-tokens";
pub const RESET_REQUESTS_HEADER: &str = "x-ratelimit-reset-requests";
pub const RESET_TOKENS_HEADER: &str = "x-ratelimit-reset-tokens";

/// Both budgets reset on a one-minute window until the server tells us
/// otherwise via a reset header.
const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60);

/// A single depleting counter with a ceiling and a reset deadline.
#[derive(Debug, Clone)]
struct Budget {
    limit: u64,
    remaining: u64,
    reset_at: Instant,
}

impl Budget {
    fn new(limit: u64, now: Instant) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: now + DEFAULT_RESET_WINDOW,
        }
    }

    fn is_exhausted(&self, now: Instant) -> bool {
        self.remaining == 0 && now < self.reset_at
    }

    /// Snaps `remaining` back to `limit` once the deadline has passed.
    /// Deliberately does not advance `reset_at`: the next authoritative
    /// deadline comes from server feedback, and until it does we treat the
    /// budget as replenished on every check.
    fn maybe_auto_reset(&mut self, now: Instant) {
        if now >= self.reset_at {
            self.remaining = self.limit;
        }
    }

    /// Applies server-reported values. Each half is applied independently
    /// so a response carrying only a `remaining` header still takes effect.
    fn apply_server_feedback(
        &mut self,
        remaining: Option<u64>,
        reset_in: Option<Duration>,
        now: Instant,
    ) {
        if let Some(remaining) = remaining {
            self.remaining = remaining.min(self.limit);
        }
        if let Some(reset_in) = reset_in {
            // A duration too large for `Instant` arithmetic is treated like
            // any other malformed reset value: the old deadline stays.
            match now.checked_add(reset_in) {
                Some(reset_at) => self.reset_at = reset_at,
                None => tracing::warn!(
                    reset_in_secs = reset_in.as_secs(),
                    "ignoring unrepresentable rate limit reset time"
                ),
            }
        }
    }
}

struct LimiterState {
    requests: Budget,
    /// `None` when no token ceiling was configured: token usage is then
    /// untracked and `acquire` only spends request capacity.
    tokens: Option<Budget>,
}

/// Tracks the requests-per-minute and tokens-per-minute budgets shared by
/// every in-flight request pipeline of one client.
///
/// Capacity is granted first-checked-wins, not FIFO: when a reset makes
/// capacity available, whichever waiter happens to re-check first gets it.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    /// Upper bound on any single wait iteration. Keeps the limiter
    /// responsive to cancellation and to concurrent header feedback that
    /// shortens the true wait, and bounds the damage of a malformed
    /// server-reported reset time.
    max_sleep: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u64, max_tokens: Option<u64>, max_sleep: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(LimiterState {
                requests: Budget::new(max_requests, now),
                tokens: max_tokens.map(|limit| Budget::new(limit, now)),
            }),
            max_sleep,
        }
    }

    /// Suspends until one unit of request capacity and `required_tokens`
    /// units of token capacity can be granted atomically.
    ///
    /// The check-then-decrement happens under the state mutex, so the sum
    /// of grants between two resets can never exceed either limit however
    /// many callers race here. All sleeping happens outside the mutex.
    pub async fn acquire(&self, required_tokens: u64) -> Result<(), Error> {
        loop {
            let wait = {
                let mut state = self.lock_state()?;
                let now = Instant::now();
                if state.requests.limit == 0 {
                    // No reset could ever produce request capacity; waiting
                    // would never terminate.
                    return Err(Error::new(ErrorDetails::InternalError {
                        message: "acquire called on a limiter with a zero request limit"
                            .to_string(),
                    }));
                }
                state.requests.maybe_auto_reset(now);
                if let Some(tokens) = &mut state.tokens {
                    tokens.maybe_auto_reset(now);
                    if required_tokens > tokens.limit {
                        // The caller pre-checks this against its config;
                        // waiting would never terminate.
                        return Err(Error::new(ErrorDetails::InternalError {
                            message: format!(
                                "acquire called with required_tokens {required_tokens} above the token limit {}",
                                tokens.limit
                            ),
                        }));
                    }
                }

                let satisfied = state.requests.remaining >= 1
                    && state
                        .tokens
                        .as_ref()
                        .is_none_or(|t| t.remaining >= required_tokens);
                if satisfied {
                    state.requests.remaining -= 1;
                    if let Some(tokens) = &mut state.tokens {
                        tokens.remaining -= required_tokens;
                    }
                    return Ok(());
                }

                // Wait until the earliest reset among the budgets blocking
                // this request, clamped so we re-check at least every
                // `max_sleep` even if the deadline is far out.
                let mut earliest: Option<Instant> = None;
                if state.requests.is_exhausted(now) {
                    earliest = Some(state.requests.reset_at);
                }
                if let Some(tokens) = &state.tokens
                    && tokens.remaining < required_tokens
                {
                    earliest = Some(match earliest {
                        Some(e) => e.min(tokens.reset_at),
                        None => tokens.reset_at,
                    });
                }
                match earliest {
                    Some(reset_at) => reset_at.saturating_duration_since(now).min(self.max_sleep),
                    // Unsatisfied without a blocking deadline; re-check
                    // shortly rather than spinning.
                    None => self.max_sleep.min(Duration::from_millis(10)),
                }
            };
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                required_tokens,
                "rate limit reached; waiting for budget reset"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Applies the server's rate-limit headers. Each of the four recognized
    /// keys is parsed and applied independently; a missing or malformed
    /// value leaves that half of that budget untouched.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let remaining_requests = parse_count_header(headers, REMAINING_REQUESTS_HEADER);
        let reset_requests = parse_reset_header(headers, RESET_REQUESTS_HEADER);
        let remaining_tokens = parse_count_header(headers, REMAINING_TOKENS_HEADER);
        let reset_tokens = parse_reset_header(headers, RESET_TOKENS_HEADER);
        if remaining_requests.is_none()
            && reset_requests.is_none()
            && remaining_tokens.is_none()
            && reset_tokens.is_none()
        {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            // Header feedback is best-effort; a poisoned lock already
            // produced an error elsewhere.
            return;
        };
        let now = Instant::now();
        state
            .requests
            .apply_server_feedback(remaining_requests, reset_requests, now);
        if let Some(tokens) = &mut state.tokens {
            tokens.apply_server_feedback(remaining_tokens, reset_tokens, now);
        }
        tracing::debug!(
            remaining_requests = state.requests.remaining,
            remaining_tokens = state.tokens.as_ref().map(|t| t.remaining),
            "applied rate limit feedback from response headers"
        );
    }

    /// Explicit auto-reset pass, so an idle limiter self-heals without
    /// waiting for the next `acquire`.
    pub fn refresh(&self) -> Result<(), Error> {
        let mut state = self.lock_state()?;
        let now = Instant::now();
        state.requests.maybe_auto_reset(now);
        if let Some(tokens) = &mut state.tokens {
            tokens.maybe_auto_reset(now);
        }
        Ok(())
    }

    pub fn max_requests(&self) -> u64 {
        self.state.lock().map_or(0, |s| s.requests.limit)
    }

    pub fn max_tokens(&self) -> Option<u64> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tokens.as_ref().map(|t| t.limit))
    }

    pub fn remaining_requests(&self) -> u64 {
        self.state.lock().map_or(0, |s| s.requests.remaining)
    }

    /// `None` when token usage is untracked.
    pub fn remaining_tokens(&self) -> Option<u64> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tokens.as_ref().map(|t| t.remaining))
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, LimiterState>, Error> {
        self.state.lock().map_err(|_| {
            Error::new(ErrorDetails::InternalError {
                message: "rate limiter state mutex poisoned".to_string(),
            })
        })
    }
}

fn parse_count_header(headers: &HeaderMap, name: &str) -> Option<u64> {
    let value = headers.get(name)?;
    let parsed = value.to_str().ok().and_then(|v| v.parse::<u64>().ok());
    if parsed.is_none() {
        tracing::warn!(header = name, value = ?value, "ignoring malformed rate limit header");
    }
    parsed
}

fn parse_reset_header(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let value = headers.get(name)?;
    let parsed = value.to_str().ok().and_then(parse_reset_interval);
    if parsed.is_none() {
        tracing::warn!(header = name, value = ?value, "ignoring malformed rate limit header");
    }
    parsed
}

/// Parses the compound duration grammar used by reset headers: one or more
/// `<integer><unit>` pairs with unit in {`h`, `m`, `s`, `ms`}, summed left
/// to right. `"1m30s"` is 90 seconds, `"500ms"` is half a second.
fn parse_reset_interval(value: &str) -> Option<Duration> {
    let mut rest = value.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 || digits_end == rest.len() {
            return None;
        }
        let (digits, tail) = rest.split_at(digits_end);
        let amount: u64 = digits.parse().ok()?;
        let (unit_len, part) = if tail.starts_with("ms") {
            (2, Duration::from_millis(amount))
        } else if let Some(seconds) = tail.strip_prefix('h').map(|_| amount.checked_mul(3600)) {
            (1, Duration::from_secs(seconds?))
        } else if let Some(seconds) = tail.strip_prefix('m').map(|_| amount.checked_mul(60)) {
            (1, Duration::from_secs(seconds?))
        } else if tail.starts_with('s') {
            (1, Duration::from_secs(amount))
        } else {
            return None;
        };
        total = total.checked_add(part)?;
        rest = &tail[unit_len..];
    }
    Some(total)
}
