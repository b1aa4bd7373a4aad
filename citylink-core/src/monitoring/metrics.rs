//! Prometheus metrics for the realtime connection layer
//!
//! Provides metrics for:
//! - Connection lifecycle (connects, reconnects, heartbeat timeouts)
//! - Message delivery (received, duplicates, malformed, sent, dropped)
//! - Rate limiting (recorded actions, limited checks)

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "citylink";

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct LinkMetrics {
    registry: Arc<Registry>,
    connection: Arc<ConnectionMetrics>,
    delivery: Arc<DeliveryMetrics>,
    rate_limit: Arc<RateLimitMetrics>,
}

impl LinkMetrics {
    /// Create a new metrics registry with all metric families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let connection = Arc::new(ConnectionMetrics::new(&registry)?);
        let delivery = Arc::new(DeliveryMetrics::new(&registry)?);
        let rate_limit = Arc::new(RateLimitMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            connection,
            delivery,
            rate_limit,
        })
    }

    /// Get the underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connection(&self) -> &ConnectionMetrics {
        &self.connection
    }

    pub fn delivery(&self) -> &DeliveryMetrics {
        &self.delivery
    }

    pub fn rate_limit(&self) -> &RateLimitMetrics {
        &self.rate_limit
    }

    /// Render every registered family in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Connection lifecycle metrics
pub struct ConnectionMetrics {
    /// Successful transport opens
    pub connects_total: IntCounter,
    /// Failed connection attempts
    pub connect_failures_total: IntCounter,
    /// Scheduled reconnects
    pub reconnects_scheduled_total: IntCounter,
    /// Connections declared dead by the heartbeat
    pub heartbeat_timeouts_total: IntCounter,
    /// Times the manager gave up after exhausting retries
    pub retries_exhausted_total: IntCounter,
    /// Transports currently open across every manager reporting here
    pub open: IntGauge,
    /// Scheduled reconnect delays in seconds
    pub reconnect_delay_seconds: Histogram,
}

impl ConnectionMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connects_total = IntCounter::with_opts(
            Opts::new("connects_total", "Successful transport opens")
                .namespace(NAMESPACE)
                .subsystem("connection"),
        )?;
        registry.register(Box::new(connects_total.clone()))?;

        let connect_failures_total = IntCounter::with_opts(
            Opts::new("connect_failures_total", "Failed connection attempts")
                .namespace(NAMESPACE)
                .subsystem("connection"),
        )?;
        registry.register(Box::new(connect_failures_total.clone()))?;

        let reconnects_scheduled_total = IntCounter::with_opts(
            Opts::new("reconnects_scheduled_total", "Reconnects scheduled after a loss")
                .namespace(NAMESPACE)
                .subsystem("connection"),
        )?;
        registry.register(Box::new(reconnects_scheduled_total.clone()))?;

        let heartbeat_timeouts_total = IntCounter::with_opts(
            Opts::new(
                "heartbeat_timeouts_total",
                "Connections declared dead by the heartbeat monitor",
            )
            .namespace(NAMESPACE)
            .subsystem("connection"),
        )?;
        registry.register(Box::new(heartbeat_timeouts_total.clone()))?;

        let retries_exhausted_total = IntCounter::with_opts(
            Opts::new(
                "retries_exhausted_total",
                "Times reconnection gave up after max attempts",
            )
            .namespace(NAMESPACE)
            .subsystem("connection"),
        )?;
        registry.register(Box::new(retries_exhausted_total.clone()))?;

        let open = IntGauge::with_opts(
            Opts::new("open", "Currently open transports")
                .namespace(NAMESPACE)
                .subsystem("connection"),
        )?;
        registry.register(Box::new(open.clone()))?;

        let reconnect_delay_seconds = Histogram::with_opts(
            HistogramOpts::new("reconnect_delay_seconds", "Scheduled reconnect delays")
                .namespace(NAMESPACE)
                .subsystem("connection")
                .buckets(vec![0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(reconnect_delay_seconds.clone()))?;

        Ok(Self {
            connects_total,
            connect_failures_total,
            reconnects_scheduled_total,
            heartbeat_timeouts_total,
            retries_exhausted_total,
            open,
            reconnect_delay_seconds,
        })
    }
}

/// Message delivery metrics
pub struct DeliveryMetrics {
    /// Data frames delivered to the consumer
    pub messages_received_total: IntCounter,
    /// Inbound frames suppressed as duplicates
    pub duplicates_suppressed_total: IntCounter,
    /// Inbound frames that failed to parse
    pub malformed_frames_total: IntCounter,
    /// Outbound messages written to the transport
    pub messages_sent_total: IntCounter,
    /// Outbound messages rejected, by reason
    pub messages_dropped_total: IntCounterVec,
    /// Events dropped because the consumer channel was full
    pub events_dropped_total: IntCounter,
}

impl DeliveryMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_received_total = IntCounter::with_opts(
            Opts::new("messages_received_total", "Data frames delivered")
                .namespace(NAMESPACE)
                .subsystem("delivery"),
        )?;
        registry.register(Box::new(messages_received_total.clone()))?;

        let duplicates_suppressed_total = IntCounter::with_opts(
            Opts::new("duplicates_suppressed_total", "Duplicate frames suppressed")
                .namespace(NAMESPACE)
                .subsystem("delivery"),
        )?;
        registry.register(Box::new(duplicates_suppressed_total.clone()))?;

        let malformed_frames_total = IntCounter::with_opts(
            Opts::new("malformed_frames_total", "Frames that failed to parse")
                .namespace(NAMESPACE)
                .subsystem("delivery"),
        )?;
        registry.register(Box::new(malformed_frames_total.clone()))?;

        let messages_sent_total = IntCounter::with_opts(
            Opts::new("messages_sent_total", "Outbound messages written")
                .namespace(NAMESPACE)
                .subsystem("delivery"),
        )?;
        registry.register(Box::new(messages_sent_total.clone()))?;

        let messages_dropped_total = IntCounterVec::new(
            Opts::new("messages_dropped_total", "Outbound messages rejected")
                .namespace(NAMESPACE)
                .subsystem("delivery"),
            &["reason"],
        )?;
        registry.register(Box::new(messages_dropped_total.clone()))?;

        let events_dropped_total = IntCounter::with_opts(
            Opts::new(
                "events_dropped_total",
                "Events dropped because the consumer channel was full",
            )
            .namespace(NAMESPACE)
            .subsystem("delivery"),
        )?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        Ok(Self {
            messages_received_total,
            duplicates_suppressed_total,
            malformed_frames_total,
            messages_sent_total,
            messages_dropped_total,
            events_dropped_total,
        })
    }
}

/// Rate limiter metrics
pub struct RateLimitMetrics {
    /// Actions recorded against an identity
    pub actions_recorded_total: IntCounter,
    /// Checks that reported the identity as limited
    pub checks_limited_total: IntCounter,
    /// Identities with a live record
    pub tracked_identities: IntGauge,
}

impl RateLimitMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let actions_recorded_total = IntCounter::with_opts(
            Opts::new("actions_recorded_total", "Actions recorded")
                .namespace(NAMESPACE)
                .subsystem("rate_limit"),
        )?;
        registry.register(Box::new(actions_recorded_total.clone()))?;

        let checks_limited_total = IntCounter::with_opts(
            Opts::new("checks_limited_total", "Checks that found the identity limited")
                .namespace(NAMESPACE)
                .subsystem("rate_limit"),
        )?;
        registry.register(Box::new(checks_limited_total.clone()))?;

        let tracked_identities = IntGauge::with_opts(
            Opts::new("tracked_identities", "Identities with a live record")
                .namespace(NAMESPACE)
                .subsystem("rate_limit"),
        )?;
        registry.register(Box::new(tracked_identities.clone()))?;

        Ok(Self {
            actions_recorded_total,
            checks_limited_total,
            tracked_identities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let metrics = LinkMetrics::new().unwrap();
        metrics.connection().connects_total.inc();
        metrics.delivery().messages_received_total.inc_by(3);
        metrics
            .delivery()
            .messages_dropped_total
            .with_label_values(&["not_open"])
            .inc();

        assert_eq!(metrics.connection().connects_total.get(), 1);
        assert_eq!(metrics.delivery().messages_received_total.get(), 3);
    }

    #[test]
    fn test_encode_uses_namespace() {
        let metrics = LinkMetrics::new().unwrap();
        metrics.rate_limit().actions_recorded_total.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("citylink_rate_limit_actions_recorded_total 1"));
        assert!(text.contains("citylink_connection_open"));
    }

    #[test]
    fn test_independent_registries() {
        // Each instance owns its registry, so two managers never collide
        let a = LinkMetrics::new().unwrap();
        let b = LinkMetrics::new().unwrap();
        a.connection().connects_total.inc();
        assert_eq!(b.connection().connects_total.get(), 0);
    }
}
