//! Queue worker: claims jobs with `FOR UPDATE SKIP LOCKED` and runs them.

use crate::blizzard::ApiClient;
use crate::data::jobs;
use crate::data::models::SyncJob;
use crate::jobs::{JobError, JobKind, backoff_secs};
use crate::sync::{aggregation, batch};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{Instrument, debug, error, info, trace, warn};

/// Maximum time a single job may run before it is treated as stuck. A full
/// character batch is ~100 rate-limited API calls, so this is generous.
const JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// Whether this attempt is the job's last: it either succeeded or will be
/// deleted rather than retried. Mirrors the branch structure in `settle`.
fn is_terminal(result: &Result<(), JobError>, retry_count: i32, max_retries: i32) -> bool {
    match result {
        Ok(()) => true,
        Err(JobError::Recoverable(_)) => retry_count + 1 >= max_retries,
        Err(JobError::Unrecoverable(_)) => true,
    }
}

/// One worker bound to a single queue. Multiple workers can share a queue;
/// the row locking keeps them from claiming the same job.
pub struct Worker {
    id: usize,
    queue: String,
    pool: PgPool,
    client: Arc<ApiClient>,
    batch_concurrency: usize,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: String,
        pool: PgPool,
        client: Arc<ApiClient>,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            id,
            queue,
            pool,
            client,
            batch_concurrency,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, queue = %self.queue, "worker started");

        loop {
            let job = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, "worker shutting down");
                    break;
                }
                result = jobs::lock_next(&self.pool, &self.queue) => {
                    match result {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            trace!(worker_id = self.id, queue = %self.queue, "queue idle");
                            time::sleep(IDLE_POLL).await;
                            continue;
                        }
                        Err(e) => {
                            warn!(worker_id = self.id, error = ?e, "failed to poll queue");
                            time::sleep(Duration::from_secs(10)).await;
                            continue;
                        }
                    }
                }
            };

            let job_id = job.id;
            let retry_count = job.retry_count;
            let max_retries = job.max_retries;
            // A character batch counts toward its cycle only when the job
            // settles for good; retried attempts must not inflate the
            // completed counter past the expected count.
            let cycle_id = match JobKind::from_payload(&job.payload) {
                Ok(JobKind::CharacterBatch { cycle_id, .. }) => Some(cycle_id),
                _ => None,
            };
            let start = std::time::Instant::now();

            let result = tokio::select! {
                _ = shutdown_rx.recv() => {
                    // Release the claim so another worker picks it up after
                    // restart.
                    if let Err(e) = jobs::unlock(&self.pool, job_id).await {
                        warn!(worker_id = self.id, job_id, error = ?e, "failed to unlock job during shutdown");
                    }
                    info!(worker_id = self.id, job_id, "shutdown during job, job released");
                    break;
                }
                result = async {
                    match time::timeout(JOB_TIMEOUT, self.process(job)).await {
                        Ok(result) => result,
                        Err(_elapsed) => Err(JobError::Recoverable(anyhow::anyhow!(
                            "job timed out after {}s",
                            JOB_TIMEOUT.as_secs()
                        ))),
                    }
                } => result,
            };

            let terminal = is_terminal(&result, retry_count, max_retries);
            self.settle(job_id, retry_count, max_retries, result, start.elapsed())
                .await;

            if terminal {
                if let Some(cycle_id) = cycle_id {
                    if let Err(e) = batch::track_cycle_completion(&self.pool, cycle_id).await {
                        error!(worker_id = self.id, job_id, cycle_id, error = ?e, "failed to track cycle completion");
                    }
                }
            }
        }
    }

    async fn process(&self, job: SyncJob) -> Result<(), JobError> {
        let kind = JobKind::from_payload(&job.payload).map_err(JobError::Unrecoverable)?;
        let span = tracing::info_span!("process_job", job_id = job.id, queue = %self.queue);

        async move {
            debug!(worker_id = self.id, "processing job");
            match kind {
                JobKind::CharacterBatch {
                    cycle_id: _,
                    region,
                    character_ids,
                } => batch::run(
                    &self.pool,
                    &self.client,
                    region,
                    &character_ids,
                    self.batch_concurrency,
                )
                .await
                .map_err(JobError::Recoverable),
                JobKind::Aggregation { season_id } => aggregation::run(&self.pool, season_id)
                    .await
                    .map_err(JobError::Recoverable),
            }
        }
        .instrument(span)
        .await
    }

    async fn settle(
        &self,
        job_id: i64,
        retry_count: i32,
        max_retries: i32,
        result: Result<(), JobError>,
        duration: Duration,
    ) {
        match result {
            Ok(()) => {
                debug!(
                    worker_id = self.id,
                    job_id,
                    duration_ms = duration.as_millis() as u64,
                    "job completed"
                );
                if let Err(e) = jobs::complete(&self.pool, job_id).await {
                    error!(worker_id = self.id, job_id, error = ?e, "failed to complete job");
                }
            }
            Err(JobError::Recoverable(e)) => {
                let next_attempt = retry_count + 1;
                if next_attempt < max_retries {
                    let delay = backoff_secs(retry_count);
                    let execute_at = Utc::now() + ChronoDuration::seconds(delay as i64);
                    warn!(
                        worker_id = self.id,
                        job_id,
                        retry_attempt = next_attempt,
                        max_retries,
                        delay_secs = delay,
                        error = ?e,
                        "job failed, scheduling retry"
                    );
                    if let Err(e) = jobs::retry(&self.pool, job_id, next_attempt, execute_at).await
                    {
                        error!(worker_id = self.id, job_id, error = ?e, "failed to schedule retry");
                    }
                } else {
                    error!(
                        worker_id = self.id,
                        job_id,
                        retry_count = next_attempt,
                        error = ?e,
                        "job failed permanently, deleting"
                    );
                    if let Err(e) = jobs::delete(&self.pool, job_id).await {
                        error!(worker_id = self.id, job_id, error = ?e, "failed to delete exhausted job");
                    }
                }
            }
            Err(JobError::Unrecoverable(e)) => {
                error!(worker_id = self.id, job_id, error = ?e, "job corrupt, deleting");
                if let Err(e) = jobs::delete(&self.pool, job_id).await {
                    error!(worker_id = self.id, job_id, error = ?e, "failed to delete corrupt job");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_attempt_with_retries_left_is_not_terminal() {
        // Counting a to-be-retried batch toward its cycle would let the
        // completed counter pass the expected count once the retry lands.
        let failed = Err(JobError::Recoverable(anyhow::anyhow!("total failure")));
        assert!(!is_terminal(&failed, 0, 5));
        assert!(!is_terminal(&failed, 3, 5));
    }

    #[test]
    fn test_success_and_discard_are_terminal() {
        assert!(is_terminal(&Ok(()), 0, 5));
        // Last allowed attempt: the job gets deleted, so the batch must be
        // counted now or never.
        let exhausted = Err(JobError::Recoverable(anyhow::anyhow!("still failing")));
        assert!(is_terminal(&exhausted, 4, 5));
        let corrupt = Err(JobError::Unrecoverable(anyhow::anyhow!("bad payload")));
        assert!(is_terminal(&corrupt, 0, 5));
    }

    #[test]
    fn test_stale_lock_outlives_job_timeout() {
        // A reclaimed lock must never race a worker still inside its
        // timeout window.
        assert!(jobs::STALE_LOCK_SECS as u64 > JOB_TIMEOUT.as_secs());
    }
}
