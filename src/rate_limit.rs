/// Rate Limiting System
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Form endpoints that accept credentials, emails or captcha answers
const FORM_PATHS: &[&str] = &[
    "/register",
    "/login",
    "/forgot-password",
    "/reset-password",
    "/resend-activation",
    "/api/token/refresh",
];

/// Multiplier from the form quota to the general quota
const GENERAL_FACTOR: u32 = 20;

fn quota(per_second: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    forms: Arc<DirectLimiter>,
    general: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            forms: Arc::new(GovernorLimiter::direct(quota(
                config.form_rps,
                config.burst_size,
            ))),
            general: Arc::new(GovernorLimiter::direct(quota(
                config.form_rps.saturating_mul(GENERAL_FACTOR),
                config.burst_size.saturating_mul(GENERAL_FACTOR / 4),
            ))),
        }
    }

    fn check(limiter: &DirectLimiter) -> PortalResult<()> {
        limiter.check().map_err(|not_until| PortalError::RateLimitExceeded {
            retry_after: not_until
                .wait_time_from(DefaultClock::default().now())
                .max(Duration::from_millis(1)),
        })
    }

    /// Check the limiter for auth form submissions
    pub fn check_form(&self) -> PortalResult<()> {
        if !self.enabled {
            return Ok(());
        }
        Self::check(&self.forms)
    }

    /// Check the limiter for everything else
    pub fn check_general(&self) -> PortalResult<()> {
        if !self.enabled {
            return Ok(());
        }
        Self::check(&self.general)
    }
}

fn is_form_submission(method: &Method, path: &str) -> bool {
    *method == Method::POST && FORM_PATHS.contains(&path)
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, PortalError> {
    if is_form_submission(request.method(), request.uri().path()) {
        ctx.rate_limiter.check_form()?;
    } else {
        ctx.rate_limiter.check_general()?;
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            enabled,
            form_rps: 1,
            burst_size: 3,
        }
    }

    #[test]
    fn test_form_burst_limit() {
        let limiter = RateLimiter::new(&config(true));
        for _ in 0..3 {
            assert!(limiter.check_form().is_ok());
        }
        match limiter.check_form() {
            Err(PortalError::RateLimitExceeded { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        // The general bucket is separate
        assert!(limiter.check_general().is_ok());
    }

    #[test]
    fn test_disabled_limiter_never_blocks() {
        let limiter = RateLimiter::new(&config(false));
        for _ in 0..100 {
            assert!(limiter.check_form().is_ok());
        }
    }

    #[test]
    fn test_form_submission_paths() {
        assert!(is_form_submission(&Method::POST, "/login"));
        assert!(is_form_submission(&Method::POST, "/forgot-password"));
        assert!(!is_form_submission(&Method::GET, "/login"));
        assert!(!is_form_submission(&Method::POST, "/upload"));
    }
}
