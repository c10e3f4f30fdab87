//! Ingestion scheduler: one batch run per interval, never overlapping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::app::ingestion::BatchWriter;
use crate::app::registry::CityRegistry;
use crate::error::IngestError;

pub struct IngestionScheduler {
    registry: Arc<CityRegistry>,
    writer: Arc<BatchWriter>,
    interval: Duration,
}

/// Running scheduler. Dropping it stops the loop once any in-progress run
/// ends; [`stop`] also waits for that.
///
/// [`stop`]: SchedulerHandle::stop
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn request_stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop ticking and wait for an in-progress run to finish.
    pub async fn stop(self) {
        self.request_stop();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "scheduler task ended abnormally");
        }
    }
}

impl IngestionScheduler {
    pub fn new(registry: Arc<CityRegistry>, writer: Arc<BatchWriter>, interval: Duration) -> Self {
        Self {
            registry,
            writer,
            interval,
        }
    }

    /// One run over a snapshot of the registry.
    pub async fn run_once(&self) -> Result<usize, IngestError> {
        let entities = self.registry.snapshot().await;
        self.writer.run(&entities).await
    }

    /// Spawn the tick loop. The first run happens one interval from now.
    ///
    /// Runs are awaited inline. A tick that came due while a run was in
    /// progress is dropped, so the next run starts on the next interval
    /// boundary after the overrun.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let start = Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "ingestion scheduler started"
            );

            let mut last_finished: Option<Instant> = None;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let due = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // handle が drop された
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    due = ticker.tick() => due,
                };

                if let Some(finished) = last_finished
                    && due < finished
                {
                    tracing::debug!("tick came due during the previous run, skipping");
                    continue;
                }

                let started = Instant::now();
                match self.run_once().await {
                    Ok(rows) => tracing::info!(
                        rows,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "ingestion run finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "ingestion run failed"),
                }
                last_finished = Some(Instant::now());
            }

            tracing::info!("ingestion scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, join }
    }
}
