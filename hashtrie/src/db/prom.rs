use lazy_static::lazy_static;
use prometheus::{exponential_buckets, Histogram, HistogramOpts, Registry};

lazy_static! {
    pub static ref NODE_LOAD_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("node_load_time", "Complete time to fetch and decode nodes",)
            .namespace("hashtrie")
            .buckets(exponential_buckets(0.00001, 2.0, 17).unwrap()),
    )
    .unwrap();
    pub static ref NODE_APPEND_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("node_append_time", "Complete time to append nodes",)
            .namespace("hashtrie")
            .buckets(exponential_buckets(0.00001, 2.0, 17).unwrap()),
    )
    .unwrap();
    pub static ref NODE_LOAD_SIZE_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("node_load_size", "Size of entries being read",)
            .namespace("hashtrie")
            .buckets(exponential_buckets(64.0, 2.0, 16).unwrap()),
    )
    .unwrap();
    pub static ref NODE_APPEND_SIZE_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("node_append_size", "Size of entries being written",)
            .namespace("hashtrie")
            .buckets(exponential_buckets(64.0, 2.0, 16).unwrap()),
    )
    .unwrap();
}

pub(crate) fn register(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(NODE_LOAD_HIST.clone()))?;
    registry.register(Box::new(NODE_APPEND_HIST.clone()))?;
    registry.register(Box::new(NODE_LOAD_SIZE_HIST.clone()))?;
    registry.register(Box::new(NODE_APPEND_SIZE_HIST.clone()))?;
    Ok(())
}
