use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Authorization ==============

/// An empty allow-list means the bot is open to everyone.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    if allowed_users.is_empty() {
        return true;
    }
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.contains(&user_id.0)
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-user token bucket. Enhancement jobs are expensive, so each photo costs
/// one token.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    window: Duration,
    buckets: HashMap<UserId, Bucket>,
    last_prune: Option<Instant>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            window,
            buckets: HashMap::new(),
            last_prune: None,
        }
    }

    /// Returns `Err(wait)` when the user has to back off.
    pub fn check(&mut self, user_id: UserId) -> Result<(), Duration> {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }

        if !matches!(self.last_prune, Some(t) if now.duration_since(t) < self.window) {
            self.prune(now);
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_per_sec <= 0.0 {
            return Err(Duration::MAX);
        }
        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Drop buckets that have refilled completely; a full bucket behaves the
    /// same as a missing one.
    fn prune(&mut self, now: Instant) {
        let (max, refill) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let idle = now.duration_since(b.last_update).as_secs_f64();
            b.tokens + idle * refill < max
        });
        self.last_prune = Some(now);
    }
}
