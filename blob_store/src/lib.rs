use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub mod directory;
pub mod mem;
pub mod metrics;
pub mod mirror;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use directory::{Directory, DirectoryLock, IndexInput, IndexOutput, SqlDirectory};
pub use mem::MemDirectory;
pub use mirror::{AsyncMirrorDirectory, SyncMirrorDirectory};
pub use schema::{Dialect, TableSchema};

use crate::{postgres::PgBlobStore, sqlite::SqliteBlobStore};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("invalid blob store configuration: {0}")]
    Configuration(String),

    #[error("blob store i/o failure: {source}")]
    Io {
        #[from]
        source: sqlx::Error,
    },

    #[error("timed out waiting for the row lock on {name}")]
    LockTimeout { name: String },

    #[error("file {name} not found")]
    FileNotFound { name: String },

    #[error("file {name} already exists")]
    AlreadyExists { name: String },

    #[error("blob store invariant violated: {0}")]
    Internal(String),
}

impl StoreError {
    /// Failures the caller may retry. Lock timeouts and transient i/o
    /// failures qualify; everything else is either fatal or needs a
    /// different call (delete-then-retry for `AlreadyExists`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::LockTimeout { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreKind {
    Postgres,
    Sqlite,
}

/// What `delete` does to a row: remove it or keep it around with the
/// soft-delete flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStrategy {
    #[default]
    Remove,
    MarkDeleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    pub kind: BlobStoreKind,
    pub connection_url: String,
    #[serde(default)]
    pub table: TableSchema,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub delete_strategy: DeleteStrategy,
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            kind: BlobStoreKind::Sqlite,
            connection_url: "sqlite::memory:".to_string(),
            table: TableSchema::default(),
            max_connections: default_max_connections(),
            lock_timeout_ms: default_lock_timeout_ms(),
            delete_strategy: DeleteStrategy::default(),
        }
    }
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.connection_url.is_empty() {
            return Err(StoreError::Configuration(
                "connection_url must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(StoreError::Configuration(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// CRUD over the table of named blobs. One row per name; the two-phase
/// write protocol (placeholder insert, row lock, content update) is owned
/// by the implementations.
#[async_trait]
pub trait BlobStoreBackend: Send + Sync + Debug {
    async fn create_table(&self) -> Result<(), StoreError>;

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn length(&self, name: &str) -> Result<u64, StoreError>;

    /// Last-modified time in epoch millis, populated by the dialect's
    /// current-timestamp expression on every mutation.
    async fn modified(&self, name: &str) -> Result<u64, StoreError>;

    /// Two-phase write of fully-buffered content. Fails with
    /// `AlreadyExists` when a row (live or soft-deleted) already holds the
    /// name; the caller deletes and retries.
    async fn write(&self, name: &str, data: Bytes) -> Result<(), StoreError>;

    async fn read(&self, name: &str) -> Result<Bytes, StoreError>;

    /// Delete per the configured strategy (row removal or soft-delete).
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Unconditional row removal, regardless of the delete strategy.
    /// Used to clear a name before a rewrite and to drop lock rows.
    async fn purge(&self, name: &str) -> Result<(), StoreError>;

    /// Copy + delete inside one transaction under the row-lock discipline,
    /// so no reader observes a transient missing or duplicate state.
    async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError>;

    async fn touch(&self, name: &str) -> Result<(), StoreError>;

    /// Claims a lock row. Returns false when the row is already held.
    async fn insert_lock_row(&self, name: &str) -> Result<bool, StoreError>;

    async fn delete_lock_row(&self, name: &str) -> Result<(), StoreError>;

    async fn lock_row_exists(&self, name: &str) -> Result<bool, StoreError>;
}

pub fn from_config(config: &BlobStoreConfig) -> Result<Arc<dyn BlobStoreBackend>, StoreError> {
    config.validate()?;
    match config.kind {
        BlobStoreKind::Postgres => Ok(Arc::new(PgBlobStore::new(config)?)),
        BlobStoreKind::Sqlite => Ok(Arc::new(SqliteBlobStore::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = BlobStoreConfig::default();
        assert!(config.validate().is_ok());

        let config = BlobStoreConfig {
            connection_url: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::LockTimeout {
            name: "f".to_string()
        }
        .is_retryable());
        assert!(!StoreError::AlreadyExists {
            name: "f".to_string()
        }
        .is_retryable());
        assert!(!StoreError::Configuration("bad".to_string()).is_retryable());
    }
}
