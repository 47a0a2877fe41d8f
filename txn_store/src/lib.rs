pub mod coordinator;
pub mod jobs;
pub mod metrics;
pub mod writer;

pub use coordinator::{JobError, TransactionCoordinator};
pub use jobs::{TransactionJob, TransactionJobs};
pub use writer::{SubIndexRegistry, SubIndexWriter, SubIndexWriterHandle};
