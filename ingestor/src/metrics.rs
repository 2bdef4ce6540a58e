use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ENVELOPES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "ingestor_envelopes_total",
            "Total envelopes dispatched, by sensor group"
        ),
        &["sensor_group"]
    )
    .unwrap();
    pub static ref DECODE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "ingestor_decode_failures_total",
            "Total envelopes whose payload failed to decode, by sensor group"
        ),
        &["sensor_group"]
    )
    .unwrap();
    pub static ref UNASSIGNED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_unassigned_total",
        "Total envelopes from devices with no registered decoder"
    ))
    .unwrap();
    pub static ref REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rejected_total",
        "Total callbacks rejected before dispatch (bad JSON or envelope fields)"
    ))
    .unwrap();
    pub static ref KIND_STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_kind_store_failures_total",
        "Total curated store write failures"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total transient database failures that were retried"
    ))
    .unwrap();
    pub static ref ARCHIVE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_archive_latency_seconds",
            "Time taken to archive a batch of entries"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_batch_size",
        "Current archive batch size being processed"
    ))
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_channel_full_total",
        "Total number of times the archive channel was full (backpressure events)"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ENVELOPES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECODE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNASSIGNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KIND_STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARCHIVE_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_labelled_counters() {
        let registry = Registry::new();
        registry
            .register(Box::new(ENVELOPES_TOTAL.clone()))
            .unwrap();
        ENVELOPES_TOTAL.with_label_values(&["magnetic"]).inc();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ingestor_envelopes_total"));
    }
}
