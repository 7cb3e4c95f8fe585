use crate::clock::{next_utc_midnight, Clock, SystemClock};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use querygate_shared::{LimitType, RateLimitExceeded};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;

pub const BYPASS_HEADER: &str = "x-ratelimit-bypass";
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

const DEFAULT_QPS: u32 = 10;
const QPS_WINDOW_SECS: i64 = 1;
const MIN_QPS_RETRY_MS: i64 = 100;
const IDLE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per rolling second. Zero falls back to the default.
    pub qps: u32,
    /// Requests per UTC day. Zero means unlimited.
    pub daily: u32,
    pub bypass_token: Option<String>,
}

struct DailyWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Per-identity counters. Each window has its own lock so the map lock is
/// never held while counting.
struct RateLimitEntry {
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
    daily: Mutex<DailyWindow>,
}

impl RateLimitEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            daily: Mutex::new(DailyWindow {
                count: 0,
                reset_at: next_utc_midnight(now),
            }),
        }
    }

    fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.timestamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .back()
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
    },
    Blocked {
        limit: u32,
        retry_after: Duration,
        limit_type: LimitType,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub qps_limit: u32,
    pub daily_limit: u32,
    pub tracked_ips: usize,
    pub bypass_active: bool,
}

/// Per-identity limiter combining a one-second sliding window with a daily
/// window that resets at UTC midnight.
pub struct RateLimiter {
    entries: DashMap<String, Arc<RateLimitEntry>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(mut config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        if config.qps == 0 {
            config.qps = DEFAULT_QPS;
        }
        if config.bypass_token.as_deref().is_some_and(str::is_empty) {
            config.bypass_token = None;
        }
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// True when `presented` matches the configured bypass secret.
    #[must_use]
    pub fn is_bypassed(&self, presented: Option<&str>) -> bool {
        match (self.config.bypass_token.as_deref(), presented) {
            (Some(expected), Some(given)) if !given.is_empty() => {
                expected.as_bytes().ct_eq(given.as_bytes()).into()
            }
            _ => false,
        }
    }

    /// Counts one request for `identity`. The QPS window is checked first; a
    /// request rejected there is not counted against the daily quota.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        let qps = self.config.qps;
        if !self.config.enabled {
            return RateLimitDecision::Allowed {
                limit: qps,
                remaining: qps,
            };
        }

        let now = self.clock.now();
        let entry = self
            .entries
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(RateLimitEntry::new(now)))
            .clone();

        let remaining = {
            let mut timestamps = entry
                .timestamps
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let window_start = now - Duration::seconds(QPS_WINDOW_SECS);
            while timestamps.front().is_some_and(|ts| *ts <= window_start) {
                timestamps.pop_front();
            }

            if timestamps.len() >= qps as usize {
                let oldest = timestamps.front().copied().unwrap_or(now);
                let mut retry_after = oldest + Duration::seconds(QPS_WINDOW_SECS) - now;
                if retry_after <= Duration::zero() {
                    retry_after = Duration::milliseconds(MIN_QPS_RETRY_MS);
                }
                return RateLimitDecision::Blocked {
                    limit: qps,
                    retry_after,
                    limit_type: LimitType::Qps,
                };
            }

            timestamps.push_back(now);
            qps.saturating_sub(timestamps.len() as u32)
        };

        let daily_limit = self.config.daily;
        if daily_limit > 0 {
            let mut daily = entry
                .daily
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if now >= daily.reset_at {
                daily.count = 0;
                daily.reset_at = next_utc_midnight(now);
            }
            if daily.count >= daily_limit {
                return RateLimitDecision::Blocked {
                    limit: daily_limit,
                    retry_after: daily.reset_at - now,
                    limit_type: LimitType::Daily,
                };
            }
            daily.count += 1;
        }

        RateLimitDecision::Allowed {
            limit: qps,
            remaining,
        }
    }

    /// Idle age after which an identity can be forgotten without losing
    /// state. With a daily quota this is a full day: an entry idle that long
    /// has already passed its UTC-midnight reset.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        if self.config.daily > 0 {
            Duration::hours(24)
        } else {
            Duration::minutes(IDLE_TTL_MINUTES)
        }
    }

    /// Drops identities whose latest request is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = self.clock.now() - max_age;
        self.entries
            .retain(|_, entry| entry.last_seen().is_some_and(|ts| ts >= cutoff));
    }

    #[must_use]
    pub fn tracked_ips(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            enabled: self.config.enabled,
            qps_limit: self.config.qps,
            daily_limit: self.config.daily,
            tracked_ips: self.tracked_ips(),
            bypass_active: self.config.bypass_token.is_some(),
        }
    }
}

/// Caller identity: CDN header, then real-IP, then the first forwarded-for
/// hop, then the socket peer.
#[must_use]
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header_value("cf-connecting-ip") {
        return ip.to_string();
    }
    if let Some(ip) = header_value("x-real-ip") {
        return ip.to_string();
    }
    if let Some(chain) = header_value("x-forwarded-for") {
        let first = chain.split(',').next().unwrap_or(chain).trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Whole seconds a throttled caller should wait, never less than one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Axum middleware: 429 with a JSON body when the caller is over a limit,
/// quota headers otherwise.
pub async fn rate_limit_middleware(
    State(state): State<Arc<crate::AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(BYPASS_HEADER)
        .and_then(|v| v.to_str().ok());
    if limiter.is_bypassed(presented) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    match limiter.check(&identity) {
        RateLimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(HeaderName::from_static(LIMIT_HEADER), HeaderValue::from(limit));
            headers.insert(
                HeaderName::from_static(REMAINING_HEADER),
                HeaderValue::from(remaining),
            );
            response
        }
        RateLimitDecision::Blocked {
            limit,
            retry_after,
            limit_type,
        } => {
            let secs = retry_after_secs(retry_after);
            tracing::warn!(ip = %identity, limit_type = %limit_type, retry_after = secs, "Rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RateLimitExceeded::new(limit_type, secs)),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            headers.insert(HeaderName::from_static(LIMIT_HEADER), HeaderValue::from(limit));
            headers.insert(
                HeaderName::from_static(REMAINING_HEADER),
                HeaderValue::from_static("0"),
            );
            response
        }
    }
}
