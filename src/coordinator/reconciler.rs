//! Periodic lease sweep and reconciliation
//!
//! One background task per coordinator. Each tick sweeps expired leases and
//! folds DEAD nodes out of the configuration. A failed cycle is logged and
//! skipped; the task only exits on shutdown.

use crate::coordinator::service::CoordinatorService;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal shutdown and wait for the task to finish its current cycle
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
}

/// Run one cycle; errors never escape
pub fn run_cycle(service: &CoordinatorService) {
    match service.reconcile_now() {
        Ok(Some(config)) => debug!(version = config.version, "Reconcile committed"),
        Ok(None) => {}
        Err(e) => {
            service.metrics().reconcile_errors_total.inc();
            warn!(error = %e, "Reconcile cycle skipped");
        }
    }
}

pub fn spawn_reconciler(service: CoordinatorService, period: Duration) -> ReconcilerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "Reconciler started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => run_cycle(&service),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reconciler stopped");
    });

    ReconcilerHandle { shutdown, task }
}
