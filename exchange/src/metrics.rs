//! Metrics collection for observability
//!
//! Prometheus metrics for the matching and verification engine.
//!
//! # Metrics
//!
//! - `exchange_offers_total` - Candidates offered (stake escrowed)
//! - `exchange_settlements_total` - Actions approved and paid out
//! - `exchange_skips_total` - Offers skipped and reverted
//! - `exchange_unconfirmed_total` - Follow claims the oracle did not confirm
//! - `exchange_oracle_failures_total` - Oracle transport failures
//! - `exchange_sweep_runs_total` - Reconciliation sweeps completed
//! - `exchange_sweep_settlements_total` - Actions approved by a sweep
//! - `exchange_verification_duration_seconds` - Oracle verification latency

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Candidates offered
    pub offers_total: IntCounter,

    /// Actions approved from a confirmed claim
    pub settlements_total: IntCounter,

    /// Offers skipped
    pub skips_total: IntCounter,

    /// Claims left pending
    pub unconfirmed_total: IntCounter,

    /// Oracle transport failures
    pub oracle_failures_total: IntCounter,

    /// Completed sweeps
    pub sweep_runs_total: IntCounter,

    /// Actions approved by sweeps
    pub sweep_settlements_total: IntCounter,

    /// Oracle verification latency
    pub verification_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("offers_total", &self.offers_total.get())
            .field("settlements_total", &self.settlements_total.get())
            .field("sweep_runs_total", &self.sweep_runs_total.get())
            .finish()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let verification_duration = Histogram::with_opts(
            HistogramOpts::new(
                "exchange_verification_duration_seconds",
                "Histogram of oracle verification latencies",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(verification_duration.clone()))?;

        Ok(Self {
            offers_total: counter(&registry, "exchange_offers_total", "Candidates offered")?,
            settlements_total: counter(
                &registry,
                "exchange_settlements_total",
                "Actions approved from a confirmed follow claim",
            )?,
            skips_total: counter(&registry, "exchange_skips_total", "Offers skipped")?,
            unconfirmed_total: counter(
                &registry,
                "exchange_unconfirmed_total",
                "Follow claims left pending",
            )?,
            oracle_failures_total: counter(
                &registry,
                "exchange_oracle_failures_total",
                "Oracle transport failures",
            )?,
            sweep_runs_total: counter(
                &registry,
                "exchange_sweep_runs_total",
                "Reconciliation sweeps completed",
            )?,
            sweep_settlements_total: counter(
                &registry,
                "exchange_sweep_settlements_total",
                "Actions approved by reconciliation sweeps",
            )?,
            verification_duration,
            registry,
        })
    }

    /// Record oracle verification latency
    pub fn record_verification(&self, duration_seconds: f64) {
        self.verification_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.offers_total.inc();
        assert_eq!(first.offers_total.get(), 1);
        assert_eq!(second.offers_total.get(), 0);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.settlements_total.inc();
        metrics.record_verification(0.2);

        let text = metrics.render().unwrap();
        assert!(text.contains("exchange_settlements_total 1"));
        assert!(text.contains("exchange_verification_duration_seconds_count 1"));
    }
}
