//! Monitoring and observability module
//!
//! Prometheus metrics for the connection manager and the rate limiter.
//! Exposing them (HTTP scrape endpoint, push gateway) is left to the host
//! application via [`LinkMetrics::encode`].

pub mod metrics;

pub use metrics::{ConnectionMetrics, DeliveryMetrics, LinkMetrics, RateLimitMetrics};
