use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use searchstore_utils::drain_with_grace;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info};

use crate::{
    directory::{Directory, DirectoryLock},
    mem::MemDirectory,
    StoreError,
};

async fn load_cache(cache: &MemDirectory, store: &Arc<dyn Directory>) -> Result<(), StoreError> {
    let names = store.list().await?;
    for name in &names {
        let data = store.read_file(name).await?;
        let modified = store.file_modified(name).await?;
        cache.load(name, data, modified).await;
    }
    info!("mirror cache loaded with {} files", names.len());
    Ok(())
}

/// Mirror that keeps the persistent directory strongly consistent: every
/// mutation updates the cache, then completes against the persistent
/// store before returning. Persistent-side failures propagate to the
/// caller.
///
/// All reads and lock handles are served from the cache and never
/// re-consult the persistent store. That is correct only while this
/// instance is the sole writer of the backing directory; divergence with
/// sibling instances is never reconciled.
pub struct SyncMirrorDirectory {
    cache: MemDirectory,
    store: Arc<dyn Directory>,
}

impl SyncMirrorDirectory {
    /// Eagerly copies the persistent directory's full contents into the
    /// in-memory cache.
    pub async fn new(store: Arc<dyn Directory>) -> Result<Self, StoreError> {
        let cache = MemDirectory::new();
        load_cache(&cache, &store).await?;
        Ok(Self { cache, store })
    }
}

#[async_trait]
impl Directory for SyncMirrorDirectory {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.cache.list().await
    }

    async fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.cache.file_exists(name).await
    }

    async fn file_length(&self, name: &str) -> Result<u64, StoreError> {
        self.cache.file_length(name).await
    }

    async fn file_modified(&self, name: &str) -> Result<u64, StoreError> {
        self.cache.file_modified(name).await
    }

    async fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        self.cache.delete_file(name).await?;
        self.store.delete_file(name).await
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.cache.rename_file(from, to).await?;
        self.store.rename_file(from, to).await
    }

    async fn touch_file(&self, name: &str) -> Result<(), StoreError> {
        self.cache.touch_file(name).await?;
        self.store.touch_file(name).await
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.cache.write_file(name, data.clone()).await?;
        self.store.write_file(name, data).await
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, StoreError> {
        self.cache.read_file(name).await
    }

    fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock> {
        self.cache.make_lock(name)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }
}

#[derive(Debug)]
enum MirrorOp {
    Write { name: String, data: Bytes },
    Delete { name: String },
    Rename { from: String, to: String },
    Touch { name: String },
}

impl MirrorOp {
    fn describe(&self) -> String {
        match self {
            MirrorOp::Write { name, .. } => format!("write {}", name),
            MirrorOp::Delete { name } => format!("delete {}", name),
            MirrorOp::Rename { from, to } => format!("rename {} -> {}", from, to),
            MirrorOp::Touch { name } => format!("touch {}", name),
        }
    }
}

async fn apply(store: &Arc<dyn Directory>, op: &MirrorOp) -> Result<(), StoreError> {
    match op {
        MirrorOp::Write { name, data } => store.write_file(name, data.clone()).await,
        MirrorOp::Delete { name } => store.delete_file(name).await,
        MirrorOp::Rename { from, to } => store.rename_file(from, to).await,
        MirrorOp::Touch { name } => store.touch_file(name).await,
    }
}

/// Mirror that acknowledges mutations as soon as the cache is updated and
/// flushes the persistent side from one background worker per instance,
/// in submission order.
///
/// Persistent-side failures on the worker are logged and dropped, never
/// surfaced to the original caller. On `close` the worker gets a bounded
/// grace period to drain its queue; whatever is still pending afterwards
/// is abandoned and logged. Content acknowledged through this mirror can
/// therefore be lost if the process dies before the worker flushes it.
pub struct AsyncMirrorDirectory {
    cache: MemDirectory,
    tx: StdMutex<Option<mpsc::UnboundedSender<MirrorOp>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl AsyncMirrorDirectory {
    pub async fn new(store: Arc<dyn Directory>, grace: Duration) -> Result<Self, StoreError> {
        let cache = MemDirectory::new();
        load_cache(&cache, &store).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorOp>();
        let worker = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                if let Err(e) = apply(&store, &op).await {
                    error!("async mirror flush failed: {}: {}", op.describe(), e);
                }
            }
            if let Err(e) = store.close().await {
                error!("async mirror failed to close persistent directory: {}", e);
            }
        });

        Ok(Self {
            cache,
            tx: StdMutex::new(Some(tx)),
            worker: StdMutex::new(Some(worker)),
            grace,
        })
    }

    fn enqueue(&self, op: MirrorOp) -> Result<(), StoreError> {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .send(op)
                .map_err(|_| StoreError::Internal("mirror worker is gone".to_string())),
            None => Err(StoreError::Internal(
                "mirror directory is closed".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Directory for AsyncMirrorDirectory {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.cache.list().await
    }

    async fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.cache.file_exists(name).await
    }

    async fn file_length(&self, name: &str) -> Result<u64, StoreError> {
        self.cache.file_length(name).await
    }

    async fn file_modified(&self, name: &str) -> Result<u64, StoreError> {
        self.cache.file_modified(name).await
    }

    async fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        self.cache.delete_file(name).await?;
        self.enqueue(MirrorOp::Delete {
            name: name.to_string(),
        })
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.cache.rename_file(from, to).await?;
        self.enqueue(MirrorOp::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    async fn touch_file(&self, name: &str) -> Result<(), StoreError> {
        self.cache.touch_file(name).await?;
        self.enqueue(MirrorOp::Touch {
            name: name.to_string(),
        })
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.cache.write_file(name, data.clone()).await?;
        self.enqueue(MirrorOp::Write {
            name: name.to_string(),
            data,
        })
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, StoreError> {
        self.cache.read_file(name).await
    }

    fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock> {
        self.cache.make_lock(name)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Dropping the sender closes the queue; the worker exits once the
        // backlog is drained.
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            drain_with_grace("async-mirror", handle, self.grace).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::time::sleep;

    use super::*;

    async fn seeded_store() -> Arc<dyn Directory> {
        let store = MemDirectory::new();
        store
            .write_file("existing", Bytes::from_static(b"seed"))
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_construction_loads_the_full_cache() {
        let store = seeded_store().await;
        let mirror = SyncMirrorDirectory::new(store.clone()).await.unwrap();
        assert_eq!(
            mirror.read_file("existing").await.unwrap(),
            Bytes::from_static(b"seed")
        );
        assert_eq!(mirror.file_modified("existing").await.unwrap(), store.file_modified("existing").await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_mirror_writes_through_immediately() {
        let store = seeded_store().await;
        let mirror = SyncMirrorDirectory::new(store.clone()).await.unwrap();
        mirror
            .write_file("seg_1", Bytes::from_static(b"content"))
            .await
            .unwrap();
        assert_eq!(mirror.file_length("seg_1").await.unwrap(), 7);
        assert_eq!(store.file_length("seg_1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reads_never_reconsult_the_store() {
        let store = seeded_store().await;
        let mirror = SyncMirrorDirectory::new(store.clone()).await.unwrap();
        // a sibling writer mutates the store behind the mirror's back
        store
            .write_file("existing", Bytes::from_static(b"changed"))
            .await
            .unwrap();
        assert_eq!(
            mirror.read_file("existing").await.unwrap(),
            Bytes::from_static(b"seed")
        );
    }

    #[tokio::test]
    async fn test_async_mirror_acknowledges_before_flushing() {
        let store = seeded_store().await;
        let mirror = AsyncMirrorDirectory::new(store.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        mirror
            .write_file("seg_1", Bytes::from_static(b"content"))
            .await
            .unwrap();
        // visible in the cache immediately, whatever the worker has done
        assert_eq!(mirror.file_length("seg_1").await.unwrap(), 7);

        mirror.close().await.unwrap();
        assert_eq!(store.file_length("seg_1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_async_mirror_preserves_submission_order() {
        let store = seeded_store().await;
        let mirror = AsyncMirrorDirectory::new(store.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        mirror
            .write_file("seg_1", Bytes::from_static(b"v1"))
            .await
            .unwrap();
        mirror.rename_file("seg_1", "seg_2").await.unwrap();
        mirror
            .write_file("seg_1", Bytes::from_static(b"v2"))
            .await
            .unwrap();
        mirror.delete_file("seg_2").await.unwrap();
        mirror.close().await.unwrap();

        assert!(!store.file_exists("seg_2").await.unwrap());
        assert_eq!(store.read_file("seg_1").await.unwrap(), Bytes::from_static(b"v2"));
    }

    /// Persistent directory whose renames stall, to pin work in the
    /// mirror queue.
    struct StalledDirectory {
        inner: MemDirectory,
    }

    #[async_trait]
    impl Directory for StalledDirectory {
        async fn list(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list().await
        }

        async fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
            self.inner.file_exists(name).await
        }

        async fn file_length(&self, name: &str) -> Result<u64, StoreError> {
            self.inner.file_length(name).await
        }

        async fn file_modified(&self, name: &str) -> Result<u64, StoreError> {
            self.inner.file_modified(name).await
        }

        async fn delete_file(&self, name: &str) -> Result<(), StoreError> {
            self.inner.delete_file(name).await
        }

        async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
            sleep(Duration::from_secs(3600)).await;
            self.inner.rename_file(from, to).await
        }

        async fn touch_file(&self, name: &str) -> Result<(), StoreError> {
            self.inner.touch_file(name).await
        }

        async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
            self.inner.write_file(name, data).await
        }

        async fn read_file(&self, name: &str) -> Result<Bytes, StoreError> {
            self.inner.read_file(name).await
        }

        fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock> {
            self.inner.make_lock(name)
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_zero_grace_close_returns_promptly() {
        let inner = MemDirectory::new();
        inner
            .write_file("seg_1", Bytes::from_static(b"v1"))
            .await
            .unwrap();
        let store: Arc<dyn Directory> = Arc::new(StalledDirectory { inner });

        let mirror = AsyncMirrorDirectory::new(store, Duration::ZERO).await.unwrap();
        mirror.rename_file("seg_1", "seg_2").await.unwrap();

        let started = Instant::now();
        mirror.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        // the persistent state of the rename is unspecified here

        // the mirror refuses further mutations once closed
        assert!(mirror.touch_file("seg_2").await.is_err());
    }
}
