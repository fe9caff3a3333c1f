//!
//! Dispatch of cluster operations to the handler of the current status.
use super::error::Failed;
use super::installed::Installed;
use super::installing::Installing;
use super::insufficient::Insufficient;
use super::ready::Ready;
use super::{Base, ClusterStatus, StateHandler, UpdateReply};
use crate::config::ClusterPolicy;
use crate::store::RecordStore;
use crate::types::Cluster;
use crate::Result;
use std::sync::Arc;

/// Entry point of the cluster state machine.
///
/// The status stored in the cluster record selects the handler. An empty or
/// unknown status is rejected for every operation, registration included;
/// callers creating a cluster set it to `insufficient` first.
pub struct StateMachine {
    insufficient: Insufficient,
    ready: Ready,
    installing: Installing,
    installed: Installed,
    error: Failed,
}

impl StateMachine {
    /// Create the state machine over a record store
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, policy: ClusterPolicy) -> Self {
        let base = Base::new(store, Arc::new(policy));
        Self {
            insufficient: Insufficient::new(base.clone()),
            ready: Ready::new(base.clone()),
            installing: Installing::new(base.clone()),
            installed: Installed::new(base.clone()),
            error: Failed::new(base),
        }
    }

    fn handler(&self, status: ClusterStatus) -> &dyn StateHandler {
        match status {
            ClusterStatus::Insufficient => &self.insufficient,
            ClusterStatus::Ready => &self.ready,
            ClusterStatus::Installing => &self.installing,
            ClusterStatus::Installed => &self.installed,
            ClusterStatus::Error => &self.error,
        }
    }

    fn current(&self, cluster: &Cluster) -> Result<&dyn StateHandler> {
        let status = cluster.status.parse().map_err(|e| {
            tracing::error!(cluster_id = %cluster.id, "{}", e);
            e
        })?;
        Ok(self.handler(status))
    }

    /// Persist a new cluster
    pub async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.current(cluster)?.register_cluster(cluster).await
    }

    /// Re-evaluate the cluster status from its hosts
    pub async fn refresh_status(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.current(cluster)?.refresh_status(cluster).await
    }

    /// Start the installation, only valid from `ready`
    pub async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.current(cluster)?.install(cluster).await
    }

    /// Delete the cluster and its hosts
    pub async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.current(cluster)?.deregister_cluster(cluster).await
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine").finish_non_exhaustive()
    }
}
