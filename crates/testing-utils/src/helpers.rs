//! Polling helpers for asynchronous engine state

use std::future::Future;
use std::time::{Duration, Instant};

use harvest_domain::{Job, JobStatus};
use harvest_errors::HarvestResult;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait for a condition to become true, returns `false` on timeout
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition().await
}

/// Poll a job lookup until the job reaches a status accepted by `accept`
///
/// ```ignore
/// let job = wait_for_job_status(|| registry.get_job_status(id), JobStatus::is_terminal, timeout).await;
/// ```
pub async fn wait_for_job_status<F, Fut, P>(
    mut fetch: F,
    accept: P,
    timeout: Duration,
) -> Option<Job>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarvestResult<Job>>,
    P: Fn(&JobStatus) -> bool,
{
    let start = Instant::now();
    loop {
        if let Ok(job) = fetch().await {
            if accept(&job.status) {
                return Some(job);
            }
        }
        if start.elapsed() >= timeout {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}
