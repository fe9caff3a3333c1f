//!
//! Cluster with enough usable masters, the only status installation starts from.
use super::{invalid_state, Base, ClusterStatus, HostAggregate, StateHandler, UpdateReply};
use crate::types::Cluster;
use crate::{Error, Result};
use async_trait::async_trait;

pub(crate) struct Ready {
    base: Base,
}

impl Ready {
    pub(crate) const fn new(base: Base) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StateHandler for Ready {
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("register", cluster, ClusterStatus::Ready))
    }

    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id), level = "debug")]
    async fn refresh_status(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base
            .transition(cluster, ClusterStatus::Ready, |hosts| {
                if hosts.ready_for_install() {
                    ClusterStatus::Ready
                } else {
                    ClusterStatus::Insufficient
                }
            })
            .await
    }

    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id))]
    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        let prior = UpdateReply::unchanged(ClusterStatus::Ready);
        let mut tx = self.base.begin(&prior).await?;

        let fresh = match tx.get_cluster(cluster.id).await {
            Ok(fresh) => fresh,
            Err(source) => {
                tx.rollback().await;
                return Err(Error::Aggregate {
                    cluster_id: cluster.id,
                    source,
                });
            }
        };

        match fresh.status.parse::<ClusterStatus>() {
            Ok(ClusterStatus::Ready) => {}
            Ok(status) => {
                tx.rollback().await;
                return Err(invalid_state("install", cluster, status));
            }
            Err(e) => {
                tx.rollback().await;
                return Err(e);
            }
        }

        if !HostAggregate::new(&fresh.hosts, &self.base.policy).ready_for_install() {
            tx.rollback().await;
            return Err(Error::NotReady(cluster.id));
        }

        self.base
            .write_status(tx, cluster.id, ClusterStatus::Ready, ClusterStatus::Installing)
            .await
    }

    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base.deregister(cluster, ClusterStatus::Ready).await
    }
}
