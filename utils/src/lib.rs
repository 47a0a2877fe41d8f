use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::warn;

pub fn get_epoch_time_in_ms() -> u64 {
    let now = SystemTime::now();
    let duration = now.duration_since(UNIX_EPOCH).unwrap();
    duration.as_millis() as u64
}

/// Waits for a background task to finish, up to `grace`. If the task is
/// still running when the grace period elapses it is aborted and the
/// abandonment is logged; the task's own errors are never surfaced here.
pub async fn drain_with_grace(name: &str, handle: JoinHandle<()>, grace: Duration) {
    if grace.is_zero() {
        warn!("abandoning background worker {} without draining", name);
        handle.abort();
        return;
    }
    let abort_handle = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(_) => {}
        Err(_) => {
            warn!(
                "background worker {} did not drain within {:?}, abandoning pending work",
                name, grace
            );
            abort_handle.abort();
        }
    }
}
