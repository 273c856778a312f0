//! In-process, per-identity request rate governor: token buckets with a
//! cooldown penalty, kept in a bounded store that evicts stale identities.

pub mod bucket;
pub mod config;
pub mod limiter;
pub mod policy;
pub mod server;
pub mod store;

pub use limiter::{Decision, Limiter};
pub use policy::{Policy, RateConfig};
