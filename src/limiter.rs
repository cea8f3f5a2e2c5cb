//! Token-bucket rate limiting per Slack API tier.
//!
//! Slack groups Web API methods into tiers, each allowing a number of requests
//! per minute. One [`Limiter`] exists per tier for the lifetime of a run and is
//! shared by every caller of that tier.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::settings::{LimitSettings, TierSettings};
use crate::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// users.list, conversations.list
    Tier2,
    /// team.info, conversations.history, conversations.replies
    Tier3,
    /// file downloads
    Tier4,
}

impl Tier {
    /// Requests per minute Slack allows for the tier.
    pub fn base_rate(self) -> u32 {
        match self {
            Tier::Tier2 => 20,
            Tier::Tier3 => 50,
            Tier::Tier4 => 100,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Tier2 => write!(f, "tier2"),
            Tier::Tier3 => write!(f, "tier3"),
            Tier::Tier4 => write!(f, "tier4"),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct Limiter {
    tier: Tier,
    interval: Duration,
    burst: f64,
    max_attempts: u32,
    bucket: Mutex<Bucket>,
}

impl Limiter {
    pub fn new(tier: Tier, settings: TierSettings) -> Self {
        let per_minute = tier.base_rate().saturating_add(settings.boost).max(1);
        let burst = settings.burst.max(1) as f64;
        Self {
            tier,
            interval: Duration::from_secs(60) / per_minute,
            burst,
            max_attempts: settings.retries.max(1),
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Time between two tokens once the burst is used up.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Takes one token, sleeping until it is available.
    ///
    /// A token is reserved before sleeping, so concurrent callers queue up
    /// one interval apart instead of waking together. A cancelled wait hands
    /// its reservation back.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let delay = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(bucket.last);
            bucket.tokens = (bucket.tokens
                + elapsed.as_secs_f64() / self.interval.as_secs_f64())
            .min(self.burst);
            bucket.last = now;
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                Duration::ZERO
            } else {
                self.interval.mul_f64(-bucket.tokens)
            }
        };

        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                let mut bucket = self.bucket.lock().await;
                bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
                Err(AppError::Cancelled)
            }
            _ = sleep(delay) => Ok(()),
        }
    }
}

/// The limiters of every tier, built once and handed to the client facade.
#[derive(Debug, Clone)]
pub struct Limits {
    pub tier2: Arc<Limiter>,
    pub tier3: Arc<Limiter>,
    pub tier4: Arc<Limiter>,
}

impl Limits {
    pub fn new(settings: &LimitSettings) -> Self {
        let limits = Self {
            tier2: Arc::new(Limiter::new(Tier::Tier2, settings.tier2)),
            tier3: Arc::new(Limiter::new(Tier::Tier3, settings.tier3)),
            tier4: Arc::new(Limiter::new(Tier::Tier4, settings.tier4)),
        };
        for limiter in [&limits.tier2, &limits.tier3, &limits.tier4] {
            debug!(
                tier = %limiter.tier(),
                interval_ms = limiter.interval().as_millis() as u64,
                max_attempts = limiter.max_attempts(),
                "limiter ready"
            );
        }
        limits
    }

    pub fn get(&self, tier: Tier) -> &Limiter {
        match tier {
            Tier::Tier2 => &self.tier2,
            Tier::Tier3 => &self.tier3,
            Tier::Tier4 => &self.tier4,
        }
    }
}
