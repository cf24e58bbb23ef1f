use crate::blizzard::{ApiClient, Credential, CredentialPool, Region};
use crate::config::Config;
use crate::data::cycles;
use crate::data::models::cycle_status;
use crate::jobs::Worker;
use crate::sync::brackets::{self, DEFAULT_QUEUE};
use crate::sync::{Scheduler, orchestrator};
use anyhow::{Context, Result};
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Main application struct containing all long-lived components.
pub struct App {
    config: Config,
    db_pool: sqlx::PgPool,
    client: Arc<ApiClient>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl App {
    /// Create a new App instance with all necessary components initialized.
    pub async fn new(config: Config) -> Result<Self> {
        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 8,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            "database pool established"
        );

        info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("failed to run database migrations")?;

        let pairs = config.credential_pairs()?;
        let credentials: Vec<Credential> = pairs
            .into_iter()
            .map(|(id, secret)| {
                Credential::new(id, secret, config.requests_per_second, config.hourly_quota)
            })
            .collect();
        info!(
            credentials = credentials.len(),
            requests_per_second = config.requests_per_second,
            hourly_quota = config.hourly_quota,
            "credential pool configured"
        );
        let client = Arc::new(
            ApiClient::new(CredentialPool::new(credentials))
                .context("failed to build API client")?,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            db_pool,
            client,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Spawn a worker set for every queue.
    pub fn start_workers(&mut self) {
        let mut worker_id = 0;
        let mut queues: Vec<String> = Region::ALL
            .iter()
            .map(|r| brackets::character_queue(*r).to_string())
            .collect();
        queues.push(DEFAULT_QUEUE.to_string());

        for queue in queues {
            for _ in 0..self.config.workers_per_queue {
                worker_id += 1;
                let worker = Worker::new(
                    worker_id,
                    queue.clone(),
                    self.db_pool.clone(),
                    self.client.clone(),
                    self.config.batch_concurrency,
                );
                let shutdown_rx = self.shutdown_tx.subscribe();
                self.tasks.push(tokio::spawn(async move {
                    worker.run(shutdown_rx).await;
                }));
            }
        }
    }

    /// Spawn the periodic cycle scheduler.
    pub fn start_scheduler(&mut self) {
        let scheduler = Scheduler::new(
            self.db_pool.clone(),
            self.client.clone(),
            Duration::from_secs(self.config.sync_interval_secs),
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));
    }

    /// Run until SIGINT or SIGTERM, then broadcast shutdown and drain
    /// tasks.
    pub async fn run(mut self) -> ExitCode {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                self.shutdown().await;
                return ExitCode::FAILURE;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = ?e, "failed to listen for shutdown signal");
                }
            }
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        self.shutdown().await;
        ExitCode::SUCCESS
    }

    /// Kick off exactly one cycle and exit once it reaches a terminal
    /// status. Workers must already be running so the cycle's jobs get
    /// processed.
    pub async fn run_once(mut self) -> ExitCode {
        let cycle_id = match orchestrator::run_cycle(&self.db_pool, &self.client).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("nothing to sync");
                self.shutdown().await;
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                error!(error = ?e, "cycle failed");
                self.shutdown().await;
                return ExitCode::FAILURE;
            }
        };

        let exit = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted before cycle finished");
                    break ExitCode::FAILURE;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    match cycles::get(&self.db_pool, cycle_id).await {
                        Ok(Some(cycle)) if cycle.status == cycle_status::COMPLETED => {
                            info!(cycle_id, "cycle completed");
                            break ExitCode::SUCCESS;
                        }
                        Ok(Some(cycle)) if cycle.status == cycle_status::FAILED => {
                            error!(cycle_id, "cycle failed");
                            break ExitCode::FAILURE;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(cycle_id, error = ?e, "failed to poll cycle status");
                        }
                    }
                }
            }
        };

        // Leave time for the aggregation job that completion enqueues.
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.shutdown().await;
        exit
    }

    async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = ?e, "task did not shut down cleanly");
            }
        }
        self.db_pool.close().await;
        info!("shutdown complete");
    }
}
