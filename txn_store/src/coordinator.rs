use std::sync::Arc;

use futures::future::join_all;
use metrics::Timer;
use tracing::{debug, warn};

use crate::{
    jobs::TransactionJobs,
    metrics::TxnStoreMetrics,
    writer::SubIndexRegistry,
};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no write engine registered for sub index {sub_index}")]
    UnknownSubIndex { sub_index: String },

    #[error("job {job} failed on sub index {sub_index}: {source}")]
    Execution {
        sub_index: String,
        job: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Applies one transaction's job batch against the registered write
/// engines.
///
/// Per sub-index batch: exclusive access to that sub-index's writer, jobs
/// strictly in recorded order, an implicit flush boundary at the end. A
/// mid-batch failure aborts the rest of that batch only; partitions that
/// already completed are never rolled back. Atomicity holds within one
/// sub-index's batch up to the point of failure, not across partitions.
pub struct TransactionCoordinator {
    registry: Arc<SubIndexRegistry>,
    metrics: TxnStoreMetrics,
}

impl TransactionCoordinator {
    pub fn new(registry: Arc<SubIndexRegistry>) -> Self {
        Self {
            registry,
            metrics: TxnStoreMetrics::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SubIndexRegistry> {
        &self.registry
    }

    #[tracing::instrument(skip(self, jobs), fields(jobs = jobs.len()))]
    pub async fn commit(&self, jobs: TransactionJobs) -> Result<(), JobError> {
        let _timer = Timer::start(&self.metrics.commit_latency);
        debug!("committing {} jobs", jobs.len());
        let partitions = jobs.partition_by_sub_index();
        let futures = partitions
            .into_iter()
            .map(|(sub_index, batch)| self.commit_sub_index(sub_index, batch));
        let results = join_all(futures).await;
        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn commit_sub_index(
        &self,
        sub_index: String,
        batch: TransactionJobs,
    ) -> Result<(), JobError> {
        let writer = self
            .registry
            .get(&sub_index)
            .ok_or_else(|| JobError::UnknownSubIndex {
                sub_index: sub_index.clone(),
            })?;
        let mut writer = writer.lock().await;
        let total = batch.len();
        for (i, job) in batch.jobs().iter().enumerate() {
            if let Err(e) = job.execute(&mut **writer).await {
                let aborted = (total - i - 1) as u64;
                self.metrics.jobs_aborted.add(aborted, &[]);
                warn!(
                    "job {} failed on sub index {}, aborting {} remaining jobs: {}",
                    job, sub_index, aborted, e
                );
                return Err(JobError::Execution {
                    sub_index,
                    job: job.to_string(),
                    source: e,
                });
            }
            self.metrics.jobs_executed.add(1, &[]);
        }
        writer.flush().await.map_err(|e| JobError::Execution {
            sub_index: sub_index.clone(),
            job: "flush".to_string(),
            source: e,
        })
    }
}
