use opentelemetry::metrics::{Counter, Histogram};

#[derive(Debug)]
pub struct BlobStoreMetrics {
    pub reads: Histogram<f64>,
    pub writes: Histogram<f64>,
    pub read_bytes: Counter<u64>,
    pub write_bytes: Counter<u64>,
}

impl Default for BlobStoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStoreMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("blob_store");
        let reads = meter
            .f64_histogram("searchstore.blob_store.reads")
            .with_description("blob read latencies in seconds")
            .build();
        let writes = meter
            .f64_histogram("searchstore.blob_store.writes")
            .with_description("blob write latencies in seconds")
            .build();
        let read_bytes = meter
            .u64_counter("searchstore.blob_store.read_bytes")
            .with_description("number of blob bytes read")
            .build();
        let write_bytes = meter
            .u64_counter("searchstore.blob_store.write_bytes")
            .with_description("number of blob bytes written")
            .build();
        Self {
            reads,
            writes,
            read_bytes,
            write_bytes,
        }
    }
}
