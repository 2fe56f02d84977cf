//! Capability interface for metrics emission.
//!
//! The core dispatch engine must not depend on a specific observability
//! library (spec.md Design Notes). Call sites take `&dyn Metrics`; the
//! gateway wires in [`TracingMetrics`] by default, but a deployment can swap
//! in a Prometheus/StatsD-backed implementation without touching dispatch
//! code.
use std::collections::HashMap;

/// A counter/dimension emitter. Implementations must be cheap to call on the
/// hot path and must never block.
pub trait Metrics: Send + Sync {
    fn incr_counter(&self, name: &str, dimensions: &[(&str, &str)]);
}

/// Default implementation: emits a structured `tracing` event per increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn incr_counter(&self, name: &str, dimensions: &[(&str, &str)]) {
        let dims: HashMap<&str, &str> = dimensions.iter().copied().collect();
        tracing::info!(metric = name, ?dims, "counter incremented");
    }
}

/// No-op implementation, useful for tests that don't care about metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl Metrics for NullMetrics {
    fn incr_counter(&self, _name: &str, _dimensions: &[(&str, &str)]) {}
}
