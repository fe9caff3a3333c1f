//!
//! Cluster without enough usable hosts. Every cluster starts here.
use super::{invalid_state, Base, ClusterStatus, StateHandler, UpdateReply};
use crate::types::Cluster;
use crate::{Error, Result};
use async_trait::async_trait;

pub(crate) struct Insufficient {
    base: Base,
}

impl Insufficient {
    pub(crate) const fn new(base: Base) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StateHandler for Insufficient {
    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id), level = "debug")]
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        let prior = UpdateReply::unchanged(ClusterStatus::Insufficient);
        let mut tx = self.base.begin(&prior).await?;

        if let Err(source) = tx.insert_cluster(cluster).await {
            tracing::error!(error = %source, "error registering cluster {}", cluster.name);
            tx.rollback().await;
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        if let Err(source) = tx.commit().await {
            tracing::error!(
                error = %source,
                "failed to commit registration of cluster {}",
                cluster.name
            );
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        tracing::info!("registered cluster {}", cluster.name);
        Ok(UpdateReply::changed(ClusterStatus::Insufficient))
    }

    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id), level = "debug")]
    async fn refresh_status(&self, cluster: &Cluster) -> Result<UpdateReply> {
        let reply = self
            .base
            .transition(cluster, ClusterStatus::Insufficient, |hosts| {
                if hosts.ready_for_install() {
                    ClusterStatus::Ready
                } else {
                    ClusterStatus::Insufficient
                }
            })
            .await?;

        if !reply.is_changed {
            tracing::debug!("cluster does not have sufficient resources to be installed");
        }
        Ok(reply)
    }

    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("install", cluster, ClusterStatus::Insufficient))
    }

    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base
            .deregister(cluster, ClusterStatus::Insufficient)
            .await
    }
}
