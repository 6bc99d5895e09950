//! Fixed-window rate limiting per client IP.
//!
//! Only `/api` paths are counted. Each client may issue `max` requests per
//! window; further requests get 429 until the window rolls over.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::errors::AppError;
use crate::AppState;

pub const LIMIT_EXCEEDED: &str = "Too many requests from this IP, please try again in an hour!";

/// Windows are swept once the table grows past this many clients.
const SWEEP_THRESHOLD: usize = 10_000;

struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset_after: Duration },
    Limited { reset_after: Duration },
}

/// Shared request counter.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Count a request from `client`.
    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Decision {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if clients.len() > SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        let reset_after = self.window.saturating_sub(now.duration_since(entry.started));
        if entry.count >= self.max {
            return Decision::Limited { reset_after };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.max - entry.count,
            reset_after,
        }
    }
}

fn set_header(response: &mut Response, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

/// Middleware counting `/api` requests per client IP.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !request.uri().path().starts_with("/api") {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let limiter = &state.rate_limiter;
    match limiter.check(&client) {
        Decision::Allowed {
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            set_header(&mut response, "x-ratelimit-limit", limiter.max());
            set_header(&mut response, "x-ratelimit-remaining", remaining);
            set_header(&mut response, "x-ratelimit-reset", reset_after.as_secs());
            response
        }
        Decision::Limited { reset_after } => {
            tracing::warn!(client = %client, "Rate limit exceeded");
            let mut response = AppError::TooManyRequests(LIMIT_EXCEEDED.to_string()).into_response();
            set_header(&mut response, "x-ratelimit-limit", limiter.max());
            set_header(&mut response, "x-ratelimit-remaining", 0);
            set_header(&mut response, "retry-after", reset_after.as_secs());
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_enforced_per_client() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at("a", now),
            Decision::Allowed { remaining: 1, .. }
        ));
        assert!(matches!(
            limiter.check_at("a", now),
            Decision::Allowed { remaining: 0, .. }
        ));
        assert!(matches!(
            limiter.check_at("a", now),
            Decision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check_at("b", now),
            Decision::Allowed { remaining: 1, .. }
        ));
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(limiter.check_at("a", now), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", now), Decision::Limited { .. }));
        assert!(matches!(
            limiter.check_at("a", now + Duration::from_secs(61)),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn test_reset_counts_down() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("a", now);

        let Decision::Allowed { reset_after, .. } =
            limiter.check_at("a", now + Duration::from_secs(20))
        else {
            panic!("expected request to be allowed");
        };
        assert_eq!(reset_after, Duration::from_secs(40));
    }
}
