//! The shared admission layer protecting the compute-heavy slicing core:
//! a per-IP fixed-window rate limiter followed by a bounded worker gate.
//! Both gates run before any filesystem work happens for a request.

mod queue;
mod rate_limit;

pub use queue::{SliceGate, SlicePermit};
pub use rate_limit::RateLimiter;
