pub mod config;
pub mod service;
pub mod telemetry;

pub use blob_store::{
    AsyncMirrorDirectory,
    BlobStoreConfig,
    Directory,
    DirectoryLock,
    IndexInput,
    IndexOutput,
    MemDirectory,
    SqlDirectory,
    StoreError,
    SyncMirrorDirectory,
};
pub use config::{MirrorConfig, MirrorMode, RoutingConfig, StoreConfig};
pub use data_model::{
    routing::{ModuloSubIndexHash, RoutingError, SubIndexHash},
    Property,
    Resource,
    ResourceBuilder,
    ResourceKey,
};
pub use service::{SearchStore, Session};
pub use txn_store::{
    JobError,
    SubIndexRegistry,
    SubIndexWriter,
    TransactionCoordinator,
    TransactionJob,
    TransactionJobs,
};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use data_model::test_objects::tests::test_resource;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingWriter {
        ops: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl SubIndexWriter for RecordingWriter {
        async fn add_resource(&mut self, resource: &Resource) -> Result<()> {
            self.ops.lock().unwrap().push(format!("create {}", resource.uid()));
            Ok(())
        }

        async fn delete_resource(&mut self, key: &ResourceKey) -> Result<()> {
            self.ops.lock().unwrap().push(format!("delete {}", key.uid()));
            Ok(())
        }

        async fn delete_by_query(&mut self, query: &str) -> Result<()> {
            self.ops.lock().unwrap().push(format!("delete_by_query {}", query));
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            self.ops.lock().unwrap().push("flush".to_string());
            Ok(())
        }
    }

    fn test_config(tmp: &tempfile::TempDir, mode: MirrorMode) -> StoreConfig {
        StoreConfig {
            database: BlobStoreConfig {
                connection_url: format!("sqlite://{}/blobs.db", tmp.path().display()),
                ..Default::default()
            },
            mirror: MirrorConfig {
                mode,
                drain_grace_ms: 30_000,
            },
            routing: RoutingConfig {
                sub_index_count: 2,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_session_routes_and_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SearchStore::new(test_config(&tmp, MirrorMode::Off))
            .await
            .unwrap();
        let writers: Vec<RecordingWriter> = store
            .sub_indexes()
            .to_vec()
            .into_iter()
            .map(|sub_index| {
                let writer = RecordingWriter::default();
                store.register_writer(sub_index, Box::new(writer.clone()));
                writer
            })
            .collect();

        let resource = test_resource("a", &["1"]);
        let routed = store.map_sub_index("a", &["1"]).unwrap().to_string();

        let mut session = store.session();
        session.create(resource.clone()).unwrap();
        session.delete(resource.key()).unwrap();
        session.create(resource).unwrap();
        session.commit().await.unwrap();

        let routed_idx = store
            .sub_indexes()
            .iter()
            .position(|s| *s == routed)
            .unwrap();
        let ops = writers[routed_idx].ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec!["create a#1#", "delete a#1#", "create a#1#", "flush"]
        );
        for (i, writer) in writers.iter().enumerate() {
            if i != routed_idx {
                assert!(writer.ops.lock().unwrap().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_directories_are_created_once_and_write_through() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SearchStore::new(test_config(&tmp, MirrorMode::Sync))
            .await
            .unwrap();

        let dir = store.directory("index_0").await.unwrap();
        let again = store.directory("index_0").await.unwrap();
        assert!(Arc::ptr_eq(&dir, &again));

        dir.write_file("seg_1", Bytes::from_static(b"content"))
            .await
            .unwrap();
        assert_eq!(dir.file_length("seg_1").await.unwrap(), 7);

        store.shutdown().await.unwrap();

        // a fresh store over the same database sees the persisted file
        let store = SearchStore::new(test_config(&tmp, MirrorMode::Sync))
            .await
            .unwrap();
        let dir = store.directory("index_0").await.unwrap();
        assert_eq!(
            dir.read_file("seg_1").await.unwrap(),
            Bytes::from_static(b"content")
        );
    }

    #[tokio::test]
    async fn test_async_mirror_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SearchStore::new(test_config(&tmp, MirrorMode::Async))
            .await
            .unwrap();
        let dir = store.directory("index_1").await.unwrap();
        dir.write_file("seg_1", Bytes::from_static(b"async"))
            .await
            .unwrap();
        // visible in the cache before the worker has flushed
        assert_eq!(dir.file_length("seg_1").await.unwrap(), 5);
        store.shutdown().await.unwrap();

        let store = SearchStore::new(test_config(&tmp, MirrorMode::Off))
            .await
            .unwrap();
        let dir = store.directory("index_1").await.unwrap();
        assert_eq!(
            dir.read_file("seg_1").await.unwrap(),
            Bytes::from_static(b"async")
        );
    }

    #[tokio::test]
    async fn test_unmapped_alias_fails_at_recording_time() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(&tmp, MirrorMode::Off);
        config.routing.aliases = Some(vec!["a".to_string()]);
        let store = SearchStore::new(config).await.unwrap();

        let mut session = store.session();
        assert!(session.create(test_resource("a", &["1"])).is_ok());
        assert!(matches!(
            session.create(test_resource("b", &["1"])),
            Err(RoutingError::UnmappedAlias { .. })
        ));
    }
}
