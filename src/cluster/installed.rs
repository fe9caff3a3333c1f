//!
//! Installation completed. Terminal, refreshes never move the cluster.
use super::{invalid_state, Base, ClusterStatus, StateHandler, UpdateReply};
use crate::types::Cluster;
use crate::Result;
use async_trait::async_trait;

pub(crate) struct Installed {
    base: Base,
}

impl Installed {
    pub(crate) const fn new(base: Base) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StateHandler for Installed {
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("register", cluster, ClusterStatus::Installed))
    }

    async fn refresh_status(&self, _cluster: &Cluster) -> Result<UpdateReply> {
        Ok(UpdateReply::unchanged(ClusterStatus::Installed))
    }

    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("install", cluster, ClusterStatus::Installed))
    }

    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base.deregister(cluster, ClusterStatus::Installed).await
    }
}
