use std::time::Duration;

/// One limiting policy: refill rate, burst size and the penalty applied once
/// a bucket runs dry.
///
/// Values are not validated. A non-positive `rate` gives a bucket that never
/// refills, a non-positive `capacity` one that never admits anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens held, i.e. the burst size.
    pub capacity: f64,
    /// How long every request is rejected after the bucket is exhausted.
    pub cooldown: Duration,
}

impl RateConfig {
    pub const AUTHENTICATED: RateConfig = RateConfig::new(0.50, 10.0, Duration::from_secs(60));
    pub const ANONYMOUS: RateConfig = RateConfig::new(0.33, 5.0, Duration::from_secs(120));

    pub const fn new(rate: f64, capacity: f64, cooldown: Duration) -> Self {
        Self {
            rate,
            capacity,
            cooldown,
        }
    }
}

/// Request classes the HTTP layer picks a policy for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Authenticated,
    Anonymous,
}

impl Policy {
    pub fn config(self) -> RateConfig {
        match self {
            Policy::Authenticated => RateConfig::AUTHENTICATED,
            Policy::Anonymous => RateConfig::ANONYMOUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_policies() {
        let auth = Policy::Authenticated.config();
        assert_eq!(auth.capacity, 10.0);
        assert_eq!(auth.rate, 0.50);
        assert_eq!(auth.cooldown, Duration::from_secs(60));

        let anon = Policy::Anonymous.config();
        assert_eq!(anon, RateConfig::ANONYMOUS);
        assert_eq!(anon.cooldown, Duration::from_secs(120));
    }
}
