//! tierdispatch - Tiered request dispatcher for hosted LLM providers
//!
//! Queues generation requests by priority, admits them through a sliding-window
//! rate limiter, routes each to a backend tier according to the caller's plan,
//! retries with primary/fallback alternation and serves repeated prompts from a
//! similarity cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod retry;
pub mod router;
pub mod telemetry;
