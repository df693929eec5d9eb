use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).unwrap_or_else(|e| panic!("invalid metric {name}: {e}"))
}

// Cycle counters
pub static CYCLES_TOTAL: LazyLock<IntCounter> =
    LazyLock::new(|| counter("oracle_cycles_total", "Cycles run to completion or abort"));

pub static CYCLES_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "oracle_cycles_aborted_total",
        "Cycles ended early by a storage failure",
    )
});

pub static TICKS_SKIPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "oracle_ticks_skipped_total",
        "Ticks skipped because a cycle was still running",
    )
});

pub static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("oracle_cycle_duration_seconds", "Wall time of one cycle")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )
    .unwrap_or_else(|e| panic!("invalid metric oracle_cycle_duration_seconds: {e}"))
});

// Deployment counters
pub static DEPLOYMENTS_TOTAL: LazyLock<IntCounter> =
    LazyLock::new(|| counter("oracle_deployments_total", "Artifacts deployed"));

pub static DEPLOYMENTS_FAILED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("oracle_deployments_failed_total", "Failed deployment calls"));

// Claim counters
pub static CLAIMS_HARVESTED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("oracle_claims_harvested_total", "Claims settled"));

pub static CLAIMS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "oracle_claims_failed_total",
        "Claim settlement attempts that failed",
    )
});

// Replication
pub static REPLICAS_CREATED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("oracle_replicas_created_total", "Replicas persisted"));

/// Register all metrics with the registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLES_ABORTED.clone()))?;
    REGISTRY.register(Box::new(TICKS_SKIPPED.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_FAILED.clone()))?;
    REGISTRY.register(Box::new(CLAIMS_HARVESTED.clone()))?;
    REGISTRY.register(Box::new(CLAIMS_FAILED.clone()))?;
    REGISTRY.register(Box::new(REPLICAS_CREATED.clone()))?;
    Ok(())
}
