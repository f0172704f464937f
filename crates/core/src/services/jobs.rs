//! Background jobs.
//!
//! The worker runs the periodic ban sweep until the shutdown channel flips
//! to `true`.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::ban::BanService;

/// Services the worker needs.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub ban_service: BanService,
    /// How often the ban sweep runs on its own.
    pub ban_sweep_interval: Duration,
}

/// Job processing service.
#[derive(Debug, Default)]
pub struct JobService;

impl JobService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Spawn the worker. It runs until `shutdown` becomes `true`.
    pub fn start(self, context: JobWorkerContext, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                sweep_interval_secs = context.ban_sweep_interval.as_secs(),
                "Job worker starting"
            );
            run_job_processor(&context, shutdown).await;
            info!("Job worker stopped");
        })
    }
}

async fn run_job_processor(context: &JobWorkerContext, mut shutdown: watch::Receiver<bool>) {
    let mut sweep = tokio::time::interval(context.ban_sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = sweep.tick() => expire_bans(context).await,
        }
    }
}

async fn expire_bans(context: &JobWorkerContext) {
    match context.ban_service.auto_expire_sweep().await {
        Ok(0) => debug!("Ban sweep: nothing expired"),
        Ok(count) => info!(count, "Ban sweep lifted expired bans"),
        Err(e) => error!(error = %e, "Ban sweep failed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medlearn_common::Metrics;
    use medlearn_db::repositories::{BanRepository, UserRepository};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn context() -> JobWorkerContext {
        // No queued results: every sweep fails and is logged.
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        JobWorkerContext {
            ban_service: BanService::new(
                BanRepository::new(db.clone()),
                UserRepository::new(db),
                Arc::new(Metrics::new()),
            ),
            ban_sweep_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = JobService::new().start(context(), rx);

        // Let the immediate first sweep run (and fail) before stopping.
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_shutdown_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = JobService::new().start(context(), rx);

        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
