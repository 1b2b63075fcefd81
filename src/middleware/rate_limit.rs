//! Rate limiting middleware
//!
//! Fixed-window counters keyed by (rate-limit group, client IP). A group
//! covers every path under its prefix; paths outside all groups are not
//! limited. Windows are aligned to `now - now % window`, so a counter resets
//! exactly at the boundary.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimitRule;
use crate::utils::AppError;
use crate::AppState;

/// Source of the current time in milliseconds since the epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: u64,
    count: u32,
}

/// Outcome of counting one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitVerdict {
    pub group: String,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window closes (rounded up)
    pub reset_after_secs: u64,
}

/// Shared limiter state
#[derive(Clone)]
pub struct RateLimitState {
    rules: Arc<Vec<RateLimitRule>>,
    windows: Arc<Mutex<HashMap<(usize, IpAddr), Window>>>,
    clock: Arc<dyn Clock>,
    trust_proxy: bool,
}

impl RateLimitState {
    pub fn new(rules: Vec<RateLimitRule>, trust_proxy: bool) -> Self {
        Self::with_clock(rules, trust_proxy, Arc::new(SystemClock))
    }

    pub fn with_clock(rules: Vec<RateLimitRule>, trust_proxy: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: Arc::new(rules),
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock,
            trust_proxy,
        }
    }

    /// Index of the group covering `path`; the longest prefix wins
    fn group_for(&self, path: &str) -> Option<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| path_in_prefix(path, &rule.path_prefix))
            .max_by_key(|(_, rule)| rule.path_prefix.len())
            .map(|(i, _)| i)
    }

    /// Count a request from `ip` to `path`.
    ///
    /// Returns `None` when no group covers the path.
    pub async fn check(&self, path: &str, ip: IpAddr) -> Option<RateLimitVerdict> {
        let index = self.group_for(path)?;
        let rule = &self.rules[index];
        let now = self.clock.now_ms();
        let window_start = now - now % rule.window_ms;

        let count = {
            let mut windows = self.windows.lock().await;
            let window = windows.entry((index, ip)).or_insert(Window {
                start_ms: window_start,
                count: 0,
            });
            if window.start_ms != window_start {
                *window = Window {
                    start_ms: window_start,
                    count: 0,
                };
            }
            window.count = window.count.saturating_add(1);
            window.count
        };

        let window_end = window_start + rule.window_ms;
        Some(RateLimitVerdict {
            group: rule.name.clone(),
            allowed: count <= rule.max_requests,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(count),
            reset_after_secs: (window_end - now).div_ceil(1000),
        })
    }

    /// Drop counters whose window has closed
    pub async fn cleanup(&self) {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock().await;
        let initial_count = windows.len();
        windows.retain(|(index, _), window| {
            self.rules
                .get(*index)
                .is_some_and(|rule| window.start_ms + rule.window_ms > now)
        });

        if windows.len() != initial_count {
            debug!(
                "Rate limiter cleanup: {} -> {} entries",
                initial_count,
                windows.len()
            );
        }
    }

    /// Client identity for rate limiting
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> IpAddr {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok());
            let real_ip = || {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
            };
            if let Some(ip) = forwarded.or_else(real_ip) {
                return ip;
            }
        }
        peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

fn path_in_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Rate limiting middleware for Axum
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limiter = &state.rate_limits;
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = limiter.client_ip(request.headers(), peer);

    let Some(verdict) = limiter.check(request.uri().path(), ip).await else {
        return next.run(request).await;
    };

    if !verdict.allowed {
        warn!(ip = %ip, group = %verdict.group, "Rate limit exceeded");
        let mut response = AppError::RateLimited {
            retry_after_secs: verdict.reset_after_secs,
        }
        .into_response();
        set_limit_headers(response.headers_mut(), &verdict);
        return response;
    }

    debug!(ip = %ip, group = %verdict.group, remaining = verdict.remaining, "Rate limit check passed");
    let mut response = next.run(request).await;
    set_limit_headers(response.headers_mut(), &verdict);
    response
}

fn set_limit_headers(headers: &mut HeaderMap, verdict: &RateLimitVerdict) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(verdict.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(verdict.remaining));
}

/// Spawn a background task to periodically clean up closed windows
pub fn spawn_rate_limit_cleanup(state: RateLimitState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            state.cleanup().await;
        }
    });
}
