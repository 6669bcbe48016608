//! Fixed-window request throttling.
//!
//! Declared as `throttle:<max>,<minutes>` (defaults `60,1`): at most `max`
//! requests per client per window of `minutes`. A client is the
//! authenticated user's `id` when present, otherwise the first
//! `x-forwarded-for` address, then `x-real-ip`.
//!
//! Allowed responses carry `x-ratelimit-limit` and `x-ratelimit-remaining`.
//! Rejected requests get `429` with the JSON error envelope and
//! `retry-after`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use strata_core::{PipelineError, PipelineResult, RequestContext, Response};
use tokio::time::Instant;

use super::authenticate::USER_ATTRIBUTE;
use crate::middleware::{BoxFuture, Middleware, Next};

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
}

const DEFAULT_MAX: u64 = 60;
const DEFAULT_MINUTES: u64 = 1;

/// Windows kept before expired ones are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Fixed-window rate limiter.
///
/// One instance serves every sequence it appears in; windows are keyed by
/// the declared limits and the client, so `throttle:10,1` and
/// `throttle:100,1` count separately.
#[derive(Debug, Default)]
pub struct Throttle {
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Allowed { remaining: u64 },
    Limited { reset_in: Duration },
}

impl Throttle {
    /// Creates a limiter with no recorded traffic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn limits(params: &[String]) -> Result<(u64, u64), String> {
        let parse = |index: usize, default: u64, what: &str| -> Result<u64, String> {
            match params.get(index) {
                None => Ok(default),
                Some(raw) => match raw.parse::<u64>() {
                    Ok(0) | Err(_) => Err(format!("{what} must be a positive integer, got '{raw}'")),
                    Ok(value) => Ok(value),
                },
            }
        };

        if params.len() > 2 {
            return Err("expected at most two parameters (max, minutes)".to_string());
        }
        Ok((parse(0, DEFAULT_MAX, "max")?, parse(1, DEFAULT_MINUTES, "minutes")?))
    }

    fn client_key(ctx: &RequestContext) -> String {
        if let Some(id) = ctx.attribute(USER_ATTRIBUTE).and_then(|user| user.get("id")) {
            return match id {
                Value::String(id) => format!("user:{id}"),
                other => format!("user:{other}"),
            };
        }

        ctx.header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .or_else(|| ctx.header("x-real-ip"))
            .map_or_else(|| "anonymous".to_string(), |addr| format!("addr:{addr}"))
    }

    fn check(&self, key: String, max: u64, window: Duration) -> Decision {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, slot| now.duration_since(slot.started) < window);
        }

        let slot = windows.entry(key).or_insert(Window { started: now, count: 0 });
        if now.duration_since(slot.started) >= window {
            *slot = Window { started: now, count: 0 };
        }

        if slot.count >= max {
            Decision::Limited {
                reset_in: window.saturating_sub(now.duration_since(slot.started)),
            }
        } else {
            slot.count += 1;
            Decision::Allowed {
                remaining: max - slot.count,
            }
        }
    }
}

impl Middleware for Throttle {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let (max, minutes) = Self::limits(params).map_err(PipelineError::internal)?;
            let client = Self::client_key(ctx);
            let key = format!("{max}/{minutes}:{client}");

            match self.check(key, max, Duration::from_secs(minutes.saturating_mul(60))) {
                Decision::Allowed { remaining } => {
                    let mut response = next.run(ctx).await?;
                    response.headers_mut().insert(headers::LIMIT, max.to_string());
                    response.headers_mut().insert(headers::REMAINING, remaining.to_string());
                    Ok(response)
                }
                Decision::Limited { reset_in } => {
                    let retry_after = reset_in.as_secs().max(1);
                    tracing::debug!(client = %client, max, minutes, retry_after, "request throttled");

                    let err = PipelineError::rate_limited("Too many requests.", Some(retry_after));
                    let request_id = ctx.request_id().to_string();
                    Ok(Response::error_envelope(&err, Some(&request_id), false)
                        .with_header(headers::LIMIT, max.to_string())
                        .with_header(headers::REMAINING, "0"))
                }
            }
        })
    }

    fn validate_params(&self, params: &[String]) -> Result<(), String> {
        Self::limits(params).map(|_| ())
    }
}
