//!
//! Periodic reconciliation of cluster statuses.
//!
//! Every tick lists all clusters and refreshes each one through the
//! [`StateMachine`]. A failing cluster is logged and skipped, it never stops
//! the tick or the loop.
use crate::cluster::StateMachine;
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing_futures::Instrument;

/// Reconciliation loop over every registered cluster
pub struct ClusterMonitor {
    store: Arc<dyn RecordStore>,
    state: Arc<StateMachine>,
    interval: Duration,
}

impl ClusterMonitor {
    /// Create a monitor ticking every `interval`
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, state: Arc<StateMachine>, interval: Duration) -> Self {
        Self {
            store,
            state,
            interval,
        }
    }

    /// Refresh every cluster once
    pub async fn tick(&self) {
        let clusters = match self.store.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                tracing::error!(error = %e, "failed to list clusters");
                return;
            }
        };

        for cluster in &clusters {
            match self.state.refresh_status(cluster).await {
                Ok(reply) if reply.is_changed => {
                    tracing::info!(
                        cluster_id = %cluster.id,
                        status = %reply.state,
                        "cluster status refreshed"
                    );
                }
                Ok(reply) => {
                    tracing::trace!(
                        cluster_id = %cluster.id,
                        status = %reply.state,
                        "cluster status unchanged"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        cluster_id = %cluster.id,
                        error = %e,
                        "failed to refresh cluster status"
                    );
                }
            }
        }
    }

    /// Run the monitor in a background task until [`MonitorHandle::stop`].
    ///
    /// Dropping the handle without calling `stop` also ends the loop after
    /// the current tick.
    #[must_use]
    pub fn start(self) -> MonitorHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let span = tracing::info_span!("cluster-monitor", interval = ?self.interval);

        let task = tokio::spawn(
            async move {
                // a zero period makes tokio panic
                let period = self.interval.max(Duration::from_micros(1));
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                tracing::info!("cluster monitor started");

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        res = stopped.changed() => {
                            if res.is_err() {
                                break;
                            }
                        }
                    }

                    if *stopped.borrow() {
                        break;
                    }
                    self.tick().await;
                }

                tracing::info!("cluster monitor stopped");
            }
            .instrument(span),
        );

        MonitorHandle { shutdown, task }
    }
}

impl std::fmt::Debug for ClusterMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Handle of a running [`ClusterMonitor`]
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor, waiting for an in-flight tick to finish
    pub async fn stop(self) {
        // the receiver is gone only if the task already ended
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "cluster monitor task failed");
        }
    }
}
