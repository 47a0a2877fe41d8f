use std::{
    collections::{HashMap, HashSet},
    mem::discriminant,
};

use anyhow::Result;
use data_model::{Resource, ResourceKey};

use crate::writer::SubIndexWriter;

/// One mutation recorded during a logical transaction, bound to the
/// sub-index that owns its document. Created when the mutation is
/// recorded, consumed exactly once during commit, never mutated.
#[derive(Debug, Clone, strum::Display)]
pub enum TransactionJob {
    Create {
        resource: Resource,
        sub_index: String,
        uid: String,
    },
    Delete {
        key: ResourceKey,
        sub_index: String,
    },
    DeleteByQuery {
        query: String,
        sub_index: String,
    },
    FlushCommit {
        sub_index: String,
    },
}

impl TransactionJob {
    pub fn create(resource: Resource, sub_index: impl Into<String>) -> Self {
        let uid = resource.uid();
        Self::Create {
            resource,
            sub_index: sub_index.into(),
            uid,
        }
    }

    pub fn delete(key: ResourceKey, sub_index: impl Into<String>) -> Self {
        Self::Delete {
            key,
            sub_index: sub_index.into(),
        }
    }

    pub fn delete_by_query(query: impl Into<String>, sub_index: impl Into<String>) -> Self {
        Self::DeleteByQuery {
            query: query.into(),
            sub_index: sub_index.into(),
        }
    }

    pub fn flush_commit(sub_index: impl Into<String>) -> Self {
        Self::FlushCommit {
            sub_index: sub_index.into(),
        }
    }

    pub fn sub_index(&self) -> &str {
        match self {
            TransactionJob::Create { sub_index, .. } |
            TransactionJob::Delete { sub_index, .. } |
            TransactionJob::DeleteByQuery { sub_index, .. } |
            TransactionJob::FlushCommit { sub_index } => sub_index,
        }
    }

    /// Identity used for equality and optional dedup. Query-based deletes
    /// and flush checkpoints have none.
    pub fn uid(&self) -> Option<&str> {
        match self {
            TransactionJob::Create { uid, .. } => Some(uid),
            TransactionJob::Delete { key, .. } => Some(key.uid()),
            TransactionJob::DeleteByQuery { .. } | TransactionJob::FlushCommit { .. } => None,
        }
    }

    pub async fn execute(&self, writer: &mut dyn SubIndexWriter) -> Result<()> {
        match self {
            TransactionJob::Create { resource, .. } => writer.add_resource(resource).await,
            TransactionJob::Delete { key, .. } => writer.delete_resource(key).await,
            TransactionJob::DeleteByQuery { query, .. } => writer.delete_by_query(query).await,
            TransactionJob::FlushCommit { .. } => writer.flush().await,
        }
    }
}

/// Two jobs are equal iff they are the same kind of operation on the same
/// resource UID. Jobs without an identity never compare equal, so this is
/// deliberately not `Eq`.
impl PartialEq for TransactionJob {
    fn eq(&self, other: &Self) -> bool {
        match (self.uid(), other.uid()) {
            (Some(a), Some(b)) => discriminant(self) == discriminant(other) && a == b,
            _ => false,
        }
    }
}

/// Ordered batch of jobs recorded during one logical transaction, plus
/// the derived set of touched sub-indexes. The batch preserves every
/// recorded operation, including repeats; dedup is something a caller
/// opts into via [`TransactionJobs::coalesce`].
#[derive(Debug, Clone, Default)]
pub struct TransactionJobs {
    jobs: Vec<TransactionJob>,
    sub_indexes: HashSet<String>,
}

impl TransactionJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, job: TransactionJob) {
        self.sub_indexes.insert(job.sub_index().to_string());
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[TransactionJob] {
        &self.jobs
    }

    pub fn sub_indexes(&self) -> &HashSet<String> {
        &self.sub_indexes
    }

    /// Splits the batch into one ordered sub-batch per sub-index,
    /// preserving relative order within each. Cross-sub-index ordering is
    /// not defined; each sub-index owns an independent write engine.
    pub fn partition_by_sub_index(self) -> HashMap<String, TransactionJobs> {
        let mut partitions: HashMap<String, TransactionJobs> = HashMap::new();
        for job in self.jobs {
            partitions
                .entry(job.sub_index().to_string())
                .or_default()
                .add(job);
        }
        partitions
    }

    /// Collapses repeated operations on the same identity, keeping only
    /// the last occurrence of each (kind, UID) pair at its recorded
    /// position. Jobs without an identity are always retained.
    pub fn coalesce(self) -> TransactionJobs {
        let mut out = TransactionJobs::new();
        for job in self.jobs {
            if job.uid().is_some() {
                out.jobs.retain(|existing| existing != &job);
            }
            out.add(job);
        }
        out
    }
}

impl IntoIterator for TransactionJobs {
    type Item = TransactionJob;
    type IntoIter = std::vec::IntoIter<TransactionJob>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}
