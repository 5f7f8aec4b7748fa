//! Per-IP fixed-window rate limiting for the HTTP API.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::warn;

pub const TOO_MANY_REQUESTS: &str = "Too many requests from this IP, please try again later.";

/// Windows are pruned once this many addresses are tracked
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Count a request from `ip` at `now`; false once the window is spent.
    pub fn check(&self, ip: IpAddr, now: Instant) -> bool {
        if self.windows.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let mut window = self.windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.config.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drop windows that have expired.
    fn prune(&self, now: Instant) {
        let span = self.config.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < span);
    }
}

/// Whether a request to `path` from `ip` is subject to the limit
fn is_limited(path: &str, ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return false;
    }
    path.starts_with("/api/") && path != "/api/health"
}

/// Axum middleware applying the limiter to API routes.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = peer {
        if is_limited(req.uri().path(), ip) && !limiter.check(ip, Instant::now()) {
            warn!(
                component = "rate_limit",
                event = "http.rate_limited",
                ip = %ip,
                path = %req.uri().path(),
                "Rate limit exceeded"
            );
            return (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS).into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: max,
            window: Duration::from_secs(window_secs),
        })
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("ip")
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = limiter(3, 60);
        let now = Instant::now();
        let client = ip("203.0.113.7");
        assert!(limiter.check(client, now));
        assert!(limiter.check(client, now));
        assert!(limiter.check(client, now));
        assert!(!limiter.check(client, now));
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        let client = ip("203.0.113.7");
        assert!(limiter.check(client, start));
        assert!(!limiter.check(client, start + Duration::from_secs(59)));
        assert!(limiter.check(client, start + Duration::from_secs(60)));
    }

    #[test]
    fn addresses_are_counted_separately() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(limiter.check(ip("203.0.113.7"), now));
        assert!(limiter.check(ip("198.51.100.2"), now));
        assert!(!limiter.check(ip("203.0.113.7"), now));
    }

    #[test]
    fn loopback_health_and_socket_are_exempt() {
        assert!(!is_limited("/api/sessions", ip("127.0.0.1")));
        assert!(!is_limited("/api/sessions", ip("::1")));
        assert!(!is_limited("/api/health", ip("203.0.113.7")));
        assert!(!is_limited("/ws", ip("203.0.113.7")));
        assert!(!is_limited("/index.html", ip("203.0.113.7")));
        assert!(is_limited("/api/sessions", ip("203.0.113.7")));
    }

    #[test]
    fn prune_drops_expired_windows() {
        let limiter = limiter(5, 10);
        let start = Instant::now();
        limiter.check(ip("203.0.113.7"), start);
        limiter.check(ip("198.51.100.2"), start + Duration::from_secs(8));
        limiter.prune(start + Duration::from_secs(12));
        assert_eq!(limiter.windows.len(), 1);
    }
}
