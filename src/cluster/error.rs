//!
//! Installation failed. Terminal, the cluster can only be deregistered.
use super::{invalid_state, Base, ClusterStatus, StateHandler, UpdateReply};
use crate::types::Cluster;
use crate::Result;
use async_trait::async_trait;

pub(crate) struct Failed {
    base: Base,
}

impl Failed {
    pub(crate) const fn new(base: Base) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StateHandler for Failed {
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("register", cluster, ClusterStatus::Error))
    }

    async fn refresh_status(&self, _cluster: &Cluster) -> Result<UpdateReply> {
        Ok(UpdateReply::unchanged(ClusterStatus::Error))
    }

    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("install", cluster, ClusterStatus::Error))
    }

    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base.deregister(cluster, ClusterStatus::Error).await
    }
}
