use std::{sync::Arc, time::Duration};

use anyhow::Result;
use blob_store::{
    AsyncMirrorDirectory,
    BlobStoreBackend,
    Directory,
    SqlDirectory,
    StoreError,
    SyncMirrorDirectory,
};
use dashmap::DashMap;
use data_model::{
    routing::{ModuloSubIndexHash, RoutingError, SubIndexHash},
    Resource,
    ResourceKey,
};
use tokio::sync::Mutex;
use tracing::info;
use txn_store::{
    JobError,
    SubIndexRegistry,
    SubIndexWriter,
    TransactionCoordinator,
    TransactionJob,
    TransactionJobs,
};

use crate::config::{MirrorMode, StoreConfig};

/// Wires the store together: the blob backend, one virtual directory per
/// sub-index (mirror-wrapped per configuration), the routing hash, the
/// write-engine registry and the commit coordinator. All handles are
/// owned here and passed explicitly; there is no process-wide registry.
pub struct SearchStore {
    config: StoreConfig,
    backend: Arc<dyn BlobStoreBackend>,
    router: ModuloSubIndexHash,
    coordinator: TransactionCoordinator,
    directories: DashMap<String, Arc<dyn Directory>>,
    // serializes directory construction so a sub-index never gets two
    // live mirror instances
    directory_init: Mutex<()>,
}

impl SearchStore {
    pub async fn new(config: StoreConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let backend = blob_store::from_config(&config.database)?;
        backend.create_table().await?;

        let router = match &config.routing.aliases {
            Some(aliases) => ModuloSubIndexHash::with_aliases(
                &config.routing.prefix,
                config.routing.sub_index_count,
                aliases.clone(),
            )?,
            None => {
                ModuloSubIndexHash::new(&config.routing.prefix, config.routing.sub_index_count)?
            }
        };
        info!(
            "initialized search store with {} sub indexes",
            config.routing.sub_index_count
        );

        Ok(Arc::new(Self {
            config,
            backend,
            router,
            coordinator: TransactionCoordinator::new(Arc::new(SubIndexRegistry::new())),
            directories: DashMap::new(),
            directory_init: Mutex::new(()),
        }))
    }

    pub fn sub_indexes(&self) -> &[String] {
        self.router.sub_indexes()
    }

    pub fn map_sub_index(&self, alias: &str, id_values: &[&str]) -> Result<&str, RoutingError> {
        self.router.map_sub_index(alias, id_values)
    }

    pub fn register_writer(&self, sub_index: impl Into<String>, writer: Box<dyn SubIndexWriter>) {
        self.coordinator.registry().register(sub_index, writer);
    }

    /// Returns the directory holding the named sub-index's segment files,
    /// creating it on first use. One instance per sub-index per store.
    pub async fn directory(&self, sub_index: &str) -> Result<Arc<dyn Directory>, StoreError> {
        if let Some(dir) = self.directories.get(sub_index) {
            return Ok(dir.value().clone());
        }
        let _guard = self.directory_init.lock().await;
        if let Some(dir) = self.directories.get(sub_index) {
            return Ok(dir.value().clone());
        }

        let sql: Arc<dyn Directory> = Arc::new(SqlDirectory::new(self.backend.clone(), sub_index));
        let dir: Arc<dyn Directory> = match self.config.mirror.mode {
            MirrorMode::Off => sql,
            MirrorMode::Sync => Arc::new(SyncMirrorDirectory::new(sql).await?),
            MirrorMode::Async => Arc::new(
                AsyncMirrorDirectory::new(
                    sql,
                    Duration::from_millis(self.config.mirror.drain_grace_ms),
                )
                .await?,
            ),
        };
        self.directories.insert(sub_index.to_string(), dir.clone());
        Ok(dir)
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            store: self.clone(),
            jobs: TransactionJobs::new(),
        }
    }

    pub async fn commit(&self, jobs: TransactionJobs) -> Result<(), JobError> {
        self.coordinator.commit(jobs).await
    }

    /// Closes every open directory. Async mirrors get their drain grace
    /// period; anything still pending afterwards is logged and dropped.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        for entry in self.directories.iter() {
            entry.value().close().await?;
        }
        self.directories.clear();
        Ok(())
    }
}

/// Records the mutations of one logical transaction and hands them to the
/// coordinator on commit. Routing happens at recording time, so the batch
/// carries its target sub-indexes.
pub struct Session {
    store: Arc<SearchStore>,
    jobs: TransactionJobs,
}

impl Session {
    pub fn create(&mut self, resource: Resource) -> Result<(), RoutingError> {
        let key = resource.key();
        let sub_index = self
            .store
            .map_sub_index(&resource.alias, &key.id_values())?
            .to_string();
        self.jobs.add(TransactionJob::create(resource, sub_index));
        Ok(())
    }

    pub fn delete(&mut self, key: ResourceKey) -> Result<(), RoutingError> {
        let sub_index = self
            .store
            .map_sub_index(key.alias(), &key.id_values())?
            .to_string();
        self.jobs.add(TransactionJob::delete(key, sub_index));
        Ok(())
    }

    pub fn delete_by_query(&mut self, query: impl Into<String>, sub_index: impl Into<String>) {
        self.jobs.add(TransactionJob::delete_by_query(query, sub_index));
    }

    pub fn flush_commit(&mut self, sub_index: impl Into<String>) {
        self.jobs.add(TransactionJob::flush_commit(sub_index));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Optional identity-keyed dedup of the recorded batch.
    pub fn coalesce(mut self) -> Self {
        self.jobs = self.jobs.coalesce();
        self
    }

    pub async fn commit(self) -> Result<(), JobError> {
        self.store.commit(self.jobs).await
    }
}
