//! Ratewall - Request Rate Admission Filter
//!
//! This crate implements a rate limiting filter that sits in front of an HTTP
//! service. Each caller, identified by its network address or API token, gets
//! a request budget per one-second window and is blocked for a fixed duration
//! once that budget is exceeded. Limiter state lives either in process memory
//! or in Redis, so several instances can share one budget.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
