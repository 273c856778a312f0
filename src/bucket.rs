use std::time::Duration;

use tokio::time::Instant;

use crate::policy::RateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Active,
    CoolingDown,
}

/// Token bucket for a single identity, with a cooldown penalty once drained.
///
/// `capacity`, `rate` and `cooldown` are fixed by the [`RateConfig`] the bucket
/// was created with. `tokens` stays within `[0, capacity]` between calls.
#[derive(Debug)]
pub struct Bucket {
    capacity: f64,
    rate: f64,
    cooldown: Duration,
    tokens: f64,
    last_accessed: Instant,
    cooldown_until: Option<Instant>,
}

impl Bucket {
    pub fn new(cfg: &RateConfig, now: Instant) -> Self {
        Self {
            capacity: cfg.capacity,
            rate: cfg.rate,
            cooldown: cfg.cooldown.min(MAX_COOLDOWN),
            tokens: cfg.capacity,
            last_accessed: now,
            cooldown_until: None,
        }
    }

    /// Refills for the time elapsed since the last admitted-or-exhausting call
    /// and takes one token if there is one.
    ///
    /// Calls made while cooling down are rejected without touching the refill
    /// clock. Running out of tokens starts a new cooldown.
    pub fn consume(&mut self, now: Instant) -> bool {
        if self.state(now) == BucketState::CoolingDown {
            return false;
        }

        self.tokens = self.projected_tokens(now);
        self.last_accessed = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }

        self.cooldown_until = Some(now + self.cooldown);
        false
    }

    pub fn state(&self, now: Instant) -> BucketState {
        match self.cooldown_until {
            Some(until) if now < until => BucketState::CoolingDown,
            _ => BucketState::Active,
        }
    }

    /// How long from `now` until a call could be admitted, assuming nothing
    /// else consumes from this bucket in between.
    pub fn retry_after(&self, now: Instant) -> Duration {
        let from = match self.cooldown_until {
            Some(until) if until > now => until,
            _ => now,
        };

        let tokens = self.projected_tokens(from);
        let wait = if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((1.0 - tokens) / self.rate).unwrap_or(Duration::MAX)
        };

        (from - now).saturating_add(wait)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_accessed).as_secs_f64();
        (self.tokens + elapsed * self.rate).min(self.capacity)
    }

    #[cfg(test)]
    pub(crate) fn clear_cooldown(&mut self) {
        self.cooldown_until = None;
    }
}

// keeps `now + cooldown` from overflowing the clock
const MAX_COOLDOWN: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);
