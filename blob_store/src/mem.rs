use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use searchstore_utils::get_epoch_time_in_ms;
use tokio::sync::{Mutex, RwLock};

use crate::{
    directory::{Directory, DirectoryLock},
    StoreError,
};

#[derive(Debug, Clone)]
struct MemFile {
    data: Bytes,
    last_modified: u64,
}

/// Entirely in-memory directory. Serves as the mirror cache and as a
/// standalone directory in tests. Lock handles are process-local.
#[derive(Debug, Default)]
pub struct MemDirectory {
    files: RwLock<HashMap<String, MemFile>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one file with an explicit modified time, used when eagerly
    /// copying a persistent directory into the cache.
    pub async fn load(&self, name: &str, data: Bytes, last_modified: u64) {
        self.files.write().await.insert(
            name.to_string(),
            MemFile {
                data,
                last_modified,
            },
        );
    }
}

#[async_trait]
impl Directory for MemDirectory {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.files.read().await.keys().cloned().collect())
    }

    async fn file_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.files.read().await.contains_key(name))
    }

    async fn file_length(&self, name: &str) -> Result<u64, StoreError> {
        let files = self.files.read().await;
        files
            .get(name)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| StoreError::FileNotFound {
                name: name.to_string(),
            })
    }

    async fn file_modified(&self, name: &str) -> Result<u64, StoreError> {
        let files = self.files.read().await;
        files
            .get(name)
            .map(|f| f.last_modified)
            .ok_or_else(|| StoreError::FileNotFound {
                name: name.to_string(),
            })
    }

    async fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        match self.files.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        match files.remove(from) {
            Some(file) => {
                files.insert(to.to_string(), file);
                Ok(())
            }
            None => Err(StoreError::FileNotFound {
                name: from.to_string(),
            }),
        }
    }

    async fn touch_file(&self, name: &str) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        match files.get_mut(name) {
            Some(file) => {
                file.last_modified = get_epoch_time_in_ms();
                Ok(())
            }
            None => Err(StoreError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.files.write().await.insert(
            name.to_string(),
            MemFile {
                data,
                last_modified: get_epoch_time_in_ms(),
            },
        );
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, StoreError> {
        let files = self.files.read().await;
        files
            .get(name)
            .map(|f| f.data.clone())
            .ok_or_else(|| StoreError::FileNotFound {
                name: name.to_string(),
            })
    }

    fn make_lock(&self, name: &str) -> Box<dyn DirectoryLock> {
        Box::new(MemLock {
            locks: self.locks.clone(),
            name: name.to_string(),
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemLock {
    locks: Arc<Mutex<HashSet<String>>>,
    name: String,
}

#[async_trait]
impl DirectoryLock for MemLock {
    async fn obtain(&self) -> Result<bool, StoreError> {
        Ok(self.locks.lock().await.insert(self.name.clone()))
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.locks.lock().await.remove(&self.name);
        Ok(())
    }

    async fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.locks.lock().await.contains(&self.name))
    }
}
