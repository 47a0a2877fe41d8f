use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{BlobStoreBackend, StoreError};

/// Suffix of the lock rows kept in the blob table next to the files they
/// guard. Lock rows never show up in directory listings.
pub const LOCK_SUFFIX: &str = ".lock";

/// Directory-style contract over a store of named binary blobs. Reads are
/// forward-sequential per open; callers that need to seek get an input
/// that buffers the full content on open.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    async fn file_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn file_length(&self, name: &str) -> Result<u64, StoreError>;

    async fn file_modified(&self, name: &str) -> Result<u64, StoreError>;

    async fn delete_file(&self, name: &str) -> Result<(), StoreError>;

    async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Metadata-only update of the last-modified time.
    async fn touch_file(&self, name: &str) -> Result<(), StoreError>;

    /// Replaces the file's content with fully-buffered bytes. Overwrites
    /// are delete-then-insert, never in-place.
    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError>;

    async fn read_file(&self, name: &str) -> Result<Bytes, StoreError>;

    fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock>;

    async fn close(&self) -> Result<(), StoreError>;

    async fn open_input(&self, name: &str) -> Result<IndexInput, StoreError> {
        Ok(IndexInput::new(self.read_file(name).await?))
    }
}

/// Named mutual-exclusion handle scoped to one directory.
#[async_trait]
pub trait DirectoryLock: Send + Sync {
    /// Attempts to take the lock; false when another holder has it.
    async fn obtain(&self) -> Result<bool, StoreError>;

    async fn release(&self) -> Result<(), StoreError>;

    async fn is_locked(&self) -> Result<bool, StoreError>;
}

/// Buffered sink for one file. Content accumulates in memory and the
/// two-phase write protocol runs once, on `close`.
pub struct IndexOutput {
    dir: Arc<dyn Directory>,
    name: String,
    buf: BytesMut,
}

impl IndexOutput {
    pub fn new(dir: Arc<dyn Directory>, name: &str) -> Self {
        Self {
            dir,
            name: name.to_string(),
            buf: BytesMut::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn write_u8(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.dir.write_file(&self.name, self.buf.freeze()).await
    }
}

/// Read cursor over fully-buffered file content. Seeking is served by the
/// buffer; the underlying store is only read once, on open.
pub struct IndexInput {
    data: Bytes,
    pos: usize,
}

impl IndexInput {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    pub fn seek(&mut self, pos: u64) -> Result<(), StoreError> {
        if pos > self.data.len() as u64 {
            return Err(StoreError::Internal(format!(
                "seek to {} past end of input of length {}",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Bytes {
        let end = (self.pos + len).min(self.data.len());
        let out = self.data.slice(self.pos..end);
        self.pos = end;
        out
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }
}

/// Adapts a [`BlobStoreBackend`] to the directory contract. All files of
/// one logical directory share the table; row keys are prefixed with the
/// directory name.
#[derive(Debug, Clone)]
pub struct SqlDirectory {
    backend: Arc<dyn BlobStoreBackend>,
    dir: String,
}

impl SqlDirectory {
    pub fn new(backend: Arc<dyn BlobStoreBackend>, dir: &str) -> Self {
        Self {
            backend,
            dir: dir.to_string(),
        }
    }

    pub fn dir_name(&self) -> &str {
        &self.dir
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.dir, name)
    }

    fn prefix(&self) -> String {
        format!("{}/", self.dir)
    }
}

#[async_trait]
impl Directory for SqlDirectory {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let prefix = self.prefix();
        let names = self.backend.list_names(&prefix).await?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix(&prefix).map(str::to_string))
            .filter(|n| !n.ends_with(LOCK_SUFFIX))
            .collect())
    }

    async fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.backend.exists(&self.key(name)).await
    }

    async fn file_length(&self, name: &str) -> Result<u64, StoreError> {
        self.backend.length(&self.key(name)).await
    }

    async fn file_modified(&self, name: &str) -> Result<u64, StoreError> {
        self.backend.modified(&self.key(name)).await
    }

    async fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        self.backend.delete(&self.key(name)).await
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.backend.rename(&self.key(from), &self.key(to)).await
    }

    async fn touch_file(&self, name: &str) -> Result<(), StoreError> {
        self.backend.touch(&self.key(name)).await
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        let key = self.key(name);
        match self.backend.write(&key, data.clone()).await {
            // Overwrite: the name is claimed (live or soft-deleted row),
            // so delete then retry the two-phase insert once.
            Err(StoreError::AlreadyExists { .. }) => {
                self.backend.purge(&key).await?;
                self.backend.write(&key, data).await
            }
            other => other,
        }
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, StoreError> {
        self.backend.read(&self.key(name)).await
    }

    fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock> {
        Box::new(SqlLock {
            backend: self.backend.clone(),
            row: format!("{}{}", self.key(name), LOCK_SUFFIX),
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Lock backed by a dedicated row in the blob table; the insert's unique
/// name key is the mutual-exclusion primitive, so it works across
/// processes sharing the table.
struct SqlLock {
    backend: Arc<dyn BlobStoreBackend>,
    row: String,
}

#[async_trait]
impl DirectoryLock for SqlLock {
    async fn obtain(&self) -> Result<bool, StoreError> {
        self.backend.insert_lock_row(&self.row).await
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.backend.delete_lock_row(&self.row).await
    }

    async fn is_locked(&self) -> Result<bool, StoreError> {
        self.backend.lock_row_exists(&self.row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_config, BlobStoreConfig};

    async fn test_directory() -> (tempfile::TempDir, Arc<dyn Directory>) {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/blobs.db", tmp.path().display());
        let config = BlobStoreConfig {
            connection_url: url,
            ..Default::default()
        };
        let backend = from_config(&config).unwrap();
        backend.create_table().await.unwrap();
        (tmp, Arc::new(SqlDirectory::new(backend, "index_0")))
    }

    #[tokio::test]
    async fn test_output_close_then_input_round_trip() {
        let (_tmp, dir) = test_directory().await;
        for size in [0usize, 1, 200_000] {
            let name = format!("seg_{}", size);
            let data = vec![0x5au8; size];
            let mut out = IndexOutput::new(dir.clone(), &name);
            out.write_bytes(&data);
            out.close().await.unwrap();

            let mut input = dir.open_input(&name).await.unwrap();
            assert_eq!(input.len(), size as u64);
            assert_eq!(input.read_bytes(size).as_ref(), &data[..]);
        }
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_tmp, dir) = test_directory().await;
        dir.write_file("f", Bytes::from_static(b"first")).await.unwrap();
        dir.write_file("f", Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(dir.read_file("f").await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(dir.file_length("f").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_list_excludes_lock_rows_and_other_directories() {
        let (_tmp, dir) = test_directory().await;
        dir.write_file("seg_1", Bytes::new()).await.unwrap();
        let lock = dir.make_lock("write");
        assert!(lock.obtain().await.unwrap());

        let names = dir.list().await.unwrap();
        assert_eq!(names, vec!["seg_1"]);
    }

    #[tokio::test]
    async fn test_make_lock_is_exclusive_by_name() {
        let (_tmp, dir) = test_directory().await;
        let lock_a = dir.make_lock("write");
        let lock_b = dir.make_lock("write");
        assert!(lock_a.obtain().await.unwrap());
        assert!(!lock_b.obtain().await.unwrap());
        lock_a.release().await.unwrap();
        assert!(lock_b.obtain().await.unwrap());
    }

    #[tokio::test]
    async fn test_byte_level_round_trip() {
        let (_tmp, dir) = test_directory().await;
        let mut out = IndexOutput::new(dir.clone(), "f");
        out.write_u8(1);
        out.write_bytes(b"abc");
        out.write_u8(0xff);
        assert_eq!(out.len(), 5);
        out.close().await.unwrap();

        let mut input = dir.open_input("f").await.unwrap();
        assert_eq!(input.read_u8(), Some(1));
        assert_eq!(input.tell(), 1);
        assert_eq!(input.read_bytes(3), Bytes::from_static(b"abc"));
        assert_eq!(input.read_u8(), Some(0xff));
        assert_eq!(input.read_u8(), None);
        assert_eq!(input.tell(), 5);
    }

    #[tokio::test]
    async fn test_input_seek() {
        let (_tmp, dir) = test_directory().await;
        dir.write_file("f", Bytes::from_static(b"abcdef")).await.unwrap();

        let mut input = dir.open_input("f").await.unwrap();
        input.seek(3).unwrap();
        assert_eq!(input.read_bytes(3), Bytes::from_static(b"def"));
        assert!(input.seek(7).is_err());
    }

    #[tokio::test]
    async fn test_rename_keeps_a_single_visible_file() {
        let (_tmp, dir) = test_directory().await;
        dir.write_file("old", Bytes::from_static(b"data")).await.unwrap();
        dir.rename_file("old", "new").await.unwrap();
        assert!(!dir.file_exists("old").await.unwrap());
        assert_eq!(dir.read_file("new").await.unwrap(), Bytes::from_static(b"data"));
        assert_eq!(dir.list().await.unwrap(), vec!["new"]);
    }
}
