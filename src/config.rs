//! Runtime settings loaded from the environment (and `.env`, if present).

use std::{env, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

use crate::store::STALE_AFTER;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub max_buckets: usize,
    /// `None` disables the background purge; eviction then only happens when
    /// the store fills up.
    pub sweep_interval: Option<Duration>,
    pub stale_after: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_buckets: 100_000,
            sweep_interval: Some(Duration::from_secs(60)),
            stale_after: STALE_AFTER,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let max_buckets = parse(&lookup, "MAX_BUCKETS")?.unwrap_or(defaults.max_buckets);
        if max_buckets == 0 {
            bail!("MAX_BUCKETS must be greater than zero");
        }

        let sweep_interval = match parse::<u64, _>(&lookup, "SWEEP_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.sweep_interval,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            max_buckets,
            sweep_interval,
            stale_after: parse(&lookup, "STALE_AFTER_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("{key} is not valid: {value:?}"))
        })
        .transpose()
}
