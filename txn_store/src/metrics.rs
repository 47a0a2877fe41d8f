use opentelemetry::metrics::{Counter, Histogram};

#[derive(Debug)]
pub struct TxnStoreMetrics {
    pub commit_latency: Histogram<f64>,
    pub jobs_executed: Counter<u64>,
    pub jobs_aborted: Counter<u64>,
}

impl Default for TxnStoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnStoreMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("txn_store");
        let commit_latency = meter
            .f64_histogram("searchstore.txn_store.commit_latency")
            .with_description("transaction commit latencies in seconds")
            .build();
        let jobs_executed = meter
            .u64_counter("searchstore.txn_store.jobs_executed")
            .with_description("number of transaction jobs executed")
            .build();
        let jobs_aborted = meter
            .u64_counter("searchstore.txn_store.jobs_aborted")
            .with_description("number of transaction jobs aborted after a mid-batch failure")
            .build();
        Self {
            commit_latency,
            jobs_executed,
            jobs_aborted,
        }
    }
}
