//! Fixed-window request throttling for the checkout and webhook endpoints.
//!
//! Counters live in process memory, keyed by client address and path prefix.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Path prefixes that are throttled. Everything else passes straight through.
pub const LIMITED_PREFIXES: [&str; 2] = ["/api/checkout", "/api/webhooks"];

pub const LIMIT_EXCEEDED_BODY: &str = "Rate limit exceeded. Try again later.";

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
            trust_proxy: false,
        }
    }

    /// Honour forwarding headers when identifying clients.
    pub fn with_trusted_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `key`. Returns `false` once the key has used up
    /// its budget for the current window.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows that have run out. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows
            .retain(|_, entry| entry.started.elapsed() < window);
        before.saturating_sub(self.windows.len())
    }

    /// Periodically purge expired windows so idle clients do not pile up.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "rate limit windows purged");
                }
            }
        })
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let Some(prefix) = LIMITED_PREFIXES.iter().find(|p| path.starts_with(**p)) else {
        return next.run(request).await;
    };

    let client = client_address(&request, state.rate_limiter.trust_proxy);
    let key = format!("{client}|{prefix}");
    if state.rate_limiter.check(&key) {
        return next.run(request).await;
    }

    tracing::warn!(%client, prefix, "rate limit exceeded");
    let retry_after = state.rate_limiter.window().as_secs().max(1);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_BODY).into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Forwarding headers are only believed when a trusted proxy sets them;
/// otherwise the peer address is used.
fn client_address(request: &Request, trust_proxy: bool) -> String {
    trust_proxy
        .then(|| forwarded_for(request.headers()))
        .flatten()
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(|ip| ip.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_budget_until_window_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("1.2.3.4|/api/checkout", start));
        assert!(limiter.check_at("1.2.3.4|/api/checkout", start));
        assert!(!limiter.check_at("1.2.3.4|/api/checkout", start));
        assert!(limiter.check_at("5.6.7.8|/api/checkout", start));

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("1.2.3.4|/api/checkout", later));
    }

    #[test]
    fn first_forwarded_address_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));
        assert_eq!(forwarded_for(&HeaderMap::new()), None);
    }

    #[test]
    fn forwarded_headers_need_a_trusted_proxy() {
        let request = || {
            let mut request = Request::new(axum::body::Body::empty());
            request
                .headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));
            request
        };
        assert_eq!(client_address(&request(), false), "10.0.0.9");
        assert_eq!(client_address(&request(), true), "203.0.113.7");
    }

    #[test]
    fn purge_keeps_live_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        assert!(limiter.check("client"));
        assert_eq!(limiter.purge_expired(), 0);
    }
}
