use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use data_model::{Resource, ResourceKey};
use tokio::sync::Mutex;

/// Handle to one sub-index's write engine. The engine itself (document
/// indexing, query evaluation) lives outside this crate; jobs only call
/// through this seam.
#[async_trait]
pub trait SubIndexWriter: Send + Sync {
    async fn add_resource(&mut self, resource: &Resource) -> Result<()>;

    async fn delete_resource(&mut self, key: &ResourceKey) -> Result<()>;

    async fn delete_by_query(&mut self, query: &str) -> Result<()>;

    /// Durably checkpoints buffered changes without closing the engine.
    async fn flush(&mut self) -> Result<()>;
}

pub type SubIndexWriterHandle = Arc<Mutex<Box<dyn SubIndexWriter>>>;

/// Explicit registry of write-engine handles, keyed by sub-index name and
/// owned by whoever wires the store together. The mutex on each handle is
/// the exclusive-access primitive the commit protocol takes per batch.
#[derive(Default)]
pub struct SubIndexRegistry {
    writers: DashMap<String, SubIndexWriterHandle>,
}

impl SubIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sub_index: impl Into<String>, writer: Box<dyn SubIndexWriter>) {
        self.writers
            .insert(sub_index.into(), Arc::new(Mutex::new(writer)));
    }

    pub fn get(&self, sub_index: &str) -> Option<SubIndexWriterHandle> {
        self.writers.get(sub_index).map(|w| w.value().clone())
    }

    pub fn sub_indexes(&self) -> Vec<String> {
        self.writers.iter().map(|e| e.key().clone()).collect()
    }
}
