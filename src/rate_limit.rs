//! Rate limits for cloud recognition requests, written as `10/s` or `600/m`.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// The period over which the rate limit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    /// Per second.
    Second,
    /// Per minute.
    Minute,
}

impl RateLimitPeriod {
    /// How long is this period?
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }

    /// The suffix used for this period in `N/<suffix>`.
    fn suffix(self) -> &'static str {
        match self {
            RateLimitPeriod::Second => "s",
            RateLimitPeriod::Minute => "m",
        }
    }
}

/// A maximum number of requests per period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in the period.
    pub max_requests: usize,
    /// The period over which the rate limit is applied.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Create a [`RateLimiter`] for this rate limit.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        // Start with a full bucket, and refill it completely once per period.
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(self.max_requests)
            .max(self.max_requests)
            .interval(self.per_period.to_duration())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period.suffix())
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (count, period) = s
            .split_once('/')
            .ok_or_else(|| anyhow!("Rate limit must look like \"10/s\": {:?}", s))?;
        let max_requests = count
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Invalid request count in rate limit {:?}", s))?;
        if max_requests == 0 {
            return Err(anyhow!("Rate limit must allow at least one request: {:?}", s));
        }
        let per_period = match period.trim() {
            "s" => RateLimitPeriod::Second,
            "m" => RateLimitPeriod::Minute,
            other => return Err(anyhow!("Unsupported rate limit period: {:?}", other)),
        };
        Ok(Self {
            max_requests,
            per_period,
        })
    }
}
