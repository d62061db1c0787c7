//! Tokio control loop: periodic ticks and reconcile passes per cluster.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::scheduler::AdmissionScheduler;
use crate::util::serde::ClusterId;

/// Handle to the running loops.
pub struct ControlLoopHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControlLoopHandle {
    /// Signal every loop to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "control loop task ended abnormally");
            }
        }
    }

    /// Number of cluster loops.
    pub fn loops(&self) -> usize {
        self.tasks.len()
    }
}

/// Spawn one loop per cluster on the current tokio runtime.
///
/// Each loop runs a full reconcile first, then alternates ticks (due retries and
/// an admission pass) with incremental reconciles until shut down.
pub fn spawn_control_loop(scheduler: Arc<AdmissionScheduler>) -> ControlLoopHandle {
    let (shutdown, rx) = watch::channel(false);
    let tasks = scheduler
        .cluster_ids()
        .into_iter()
        .map(|cluster| tokio::spawn(run_cluster(Arc::clone(&scheduler), cluster, rx.clone())))
        .collect();
    ControlLoopHandle { shutdown, tasks }
}

async fn run_cluster(scheduler: Arc<AdmissionScheduler>, cluster: ClusterId, mut shutdown: watch::Receiver<bool>) {
    let reconciler = &scheduler.config().reconciler;
    let tick_every = Duration::from_millis(reconciler.tick_interval_ms.max(1));
    let reconcile_every = Duration::from_secs(reconciler.interval_secs.max(1));

    match scheduler.reconcile_full(&cluster).await {
        Ok(report) => tracing::info!(%cluster, ?report, "startup reconcile finished"),
        Err(err) => tracing::error!(%cluster, error = %err, "startup reconcile failed"),
    }

    let mut tick = tokio::time::interval(tick_every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut reconcile = tokio::time::interval_at(tokio::time::Instant::now() + reconcile_every, reconcile_every);
    reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!(%cluster, "control loop stopping");
                    break;
                }
            }
            _ = tick.tick() => {
                match scheduler.tick_cluster(&cluster).await {
                    Ok(0) => {}
                    Ok(admitted) => tracing::debug!(%cluster, admitted, "tick admitted jobs"),
                    Err(err) => tracing::warn!(%cluster, error = %err, "tick failed"),
                }
            }
            _ = reconcile.tick() => {
                match scheduler.reconcile_incremental(&cluster).await {
                    Ok(report) if report.is_clean() => {}
                    Ok(report) => tracing::info!(%cluster, ?report, "reconcile repaired drift"),
                    Err(err) => tracing::warn!(%cluster, error = %err, "reconcile failed"),
                }
            }
        }
    }
}
