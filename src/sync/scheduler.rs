//! Periodic cycle kickoff.

use crate::blizzard::ApiClient;
use crate::data::models::cycle_status;
use crate::sync::orchestrator;
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub struct Scheduler {
    pool: PgPool,
    client: Arc<ApiClient>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(pool: PgPool, client: Arc<ApiClient>, interval: Duration) -> Self {
        Self {
            pool,
            client,
            interval,
        }
    }

    /// Kick off a cycle immediately, then on every interval tick until
    /// shutdown. A cycle that is still fanning out when the next tick
    /// lands simply overlaps; the queues serialize the actual work.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = ?e, "sync cycle kickoff failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        if let Some(open) = self.open_cycle().await? {
            warn!(cycle_id = open, "previous cycle still open, starting a new one anyway");
        }
        orchestrator::run_cycle(&self.pool, &self.client).await?;
        Ok(())
    }

    /// Most recent cycle that has not reached a terminal status, if any.
    async fn open_cycle(&self) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM sync_cycles
            WHERE status NOT IN ($1, $2)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(cycle_status::COMPLETED)
        .bind(cycle_status::FAILED)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}
