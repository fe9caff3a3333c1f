//!
//! Cluster state machine.
//!
//! Each [`ClusterStatus`] has its own handler implementing [`StateHandler`].
//! Handlers share a [`Base`] holding the record store and the readiness
//! policy; the [`StateMachine`] picks the handler matching the stored status.
//!
//! Status writes always follow the same path: begin a transaction, re-read
//! the cluster inside it, decide, write only when the status changes, commit.
use crate::config::ClusterPolicy;
use crate::store::{RecordStore, Transaction};
use crate::types::Cluster;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub mod aggregate;
mod error;
mod installed;
mod installing;
mod insufficient;
mod ready;
pub mod state_machine;

pub use aggregate::HostAggregate;
pub use state_machine::StateMachine;

/// State reported for a cluster that has been deregistered
pub const UNREGISTERED: &str = "unregistered";

/// Status of a registered cluster
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    /// Not enough usable hosts to install
    Insufficient,
    /// Can be installed
    Ready,
    /// Installation triggered
    Installing,
    /// Installation completed
    Installed,
    /// Installation failed
    Error,
}

impl ClusterStatus {
    /// All known statuses
    pub const ALL: [Self; 5] = [
        Self::Insufficient,
        Self::Ready,
        Self::Installing,
        Self::Installed,
        Self::Error,
    ];

    /// Status as stored in the cluster record
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insufficient => "insufficient",
            Self::Ready => "ready",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClusterStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::UnsupportedStatus(s.to_string()))
    }
}

/// Outcome of a state machine operation
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateReply {
    /// Status after the operation
    pub state: String,
    /// Whether the operation wrote anything
    pub is_changed: bool,
}

impl UpdateReply {
    /// Nothing was written, the cluster stays in `status`
    #[must_use]
    pub fn unchanged(status: ClusterStatus) -> Self {
        Self {
            state: status.to_string(),
            is_changed: false,
        }
    }

    /// The cluster moved to `status`
    #[must_use]
    pub fn changed(status: ClusterStatus) -> Self {
        Self {
            state: status.to_string(),
            is_changed: true,
        }
    }
}

/// Operations every cluster state implements
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Persist a newly registered cluster
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply>;

    /// Re-evaluate the status from the current host data
    async fn refresh_status(&self, cluster: &Cluster) -> Result<UpdateReply>;

    /// Move the cluster into installation
    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply>;

    /// Delete the cluster and its hosts
    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply>;
}

/// Dependencies shared by all state handlers
#[derive(Clone)]
pub(crate) struct Base {
    store: Arc<dyn RecordStore>,
    policy: Arc<ClusterPolicy>,
}

impl Base {
    pub(crate) fn new(store: Arc<dyn RecordStore>, policy: Arc<ClusterPolicy>) -> Self {
        Self { store, policy }
    }

    async fn begin(&self, prior: &UpdateReply) -> Result<Box<dyn Transaction>> {
        self.store.begin().await.map_err(|source| {
            tracing::error!(error = %source, "failed to start transaction");
            Error::Persistence {
                reply: prior.clone(),
                source,
            }
        })
    }

    /// Re-read the cluster in a fresh transaction and move it to whatever
    /// `decide` returns for the current host data.
    ///
    /// If another writer changed the status in the meantime nothing is
    /// written and the fresh status is returned unchanged.
    async fn transition<F>(
        &self,
        cluster: &Cluster,
        from: ClusterStatus,
        decide: F,
    ) -> Result<UpdateReply>
    where
        F: FnOnce(&HostAggregate) -> ClusterStatus + Send,
    {
        let prior = UpdateReply::unchanged(from);
        let mut tx = self.begin(&prior).await?;

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

        if fresh.status != from.as_str() {
            tracing::debug!(
                cluster_id = %cluster.id,
                expected = %from,
                found = %fresh.status,
                "cluster status changed concurrently"
            );
            tx.rollback().await;
            return Ok(UpdateReply {
                state: fresh.status,
                is_changed: false,
            });
        }

        let aggregate = HostAggregate::new(&fresh.hosts, &self.policy);
        let next = decide(&aggregate);
        if next == from {
            tx.rollback().await;
            return Ok(prior);
        }

        self.write_status(tx, cluster.id, from, next).await
    }

    /// Write `to` and commit, rolling back and reporting `from` on failure
    async fn write_status(
        &self,
        mut tx: Box<dyn Transaction>,
        id: Uuid,
        from: ClusterStatus,
        to: ClusterStatus,
    ) -> Result<UpdateReply> {
        let prior = UpdateReply::unchanged(from);

        if let Err(source) = tx.set_cluster_status(id, to).await {
            tracing::error!(cluster_id = %id, error = %source, "failed to update cluster status");
            tx.rollback().await;
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        if let Err(source) = tx.commit().await {
            tracing::error!(
                cluster_id = %id,
                error = %source,
                "failed to commit cluster {} status change to {}",
                from,
                to
            );
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        tracing::info!(cluster_id = %id, "cluster status changed {} -> {}", from, to);
        Ok(UpdateReply::changed(to))
    }

    async fn deregister(&self, cluster: &Cluster, current: ClusterStatus) -> Result<UpdateReply> {
        let prior = UpdateReply::unchanged(current);
        let mut tx = self.begin(&prior).await?;

        let fresh = match tx.get_cluster(cluster.id).await {
            Ok(fresh) => fresh,
            Err(source) => {
                tx.rollback().await;
                return Err(Error::Store(source));
            }
        };
        if fresh.status != current.as_str() {
            tx.rollback().await;
            return Err(match fresh.status.parse::<ClusterStatus>() {
                Ok(status) => invalid_state("deregister", cluster, status),
                Err(e) => e,
            });
        }

        if let Err(source) = tx.delete_cluster(cluster.id).await {
            tracing::error!(cluster_id = %cluster.id, error = %source, "failed to delete cluster");
            tx.rollback().await;
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        if let Err(source) = tx.commit().await {
            tracing::error!(
                cluster_id = %cluster.id,
                error = %source,
                "failed to commit cluster deletion"
            );
            return Err(Error::Persistence {
                reply: prior,
                source,
            });
        }

        tracing::info!(cluster_id = %cluster.id, "cluster deregistered");
        Ok(UpdateReply {
            state: UNREGISTERED.to_string(),
            is_changed: true,
        })
    }
}

fn invalid_state(operation: &'static str, cluster: &Cluster, status: ClusterStatus) -> Error {
    Error::InvalidState {
        operation,
        cluster_id: cluster.id,
        status: status.to_string(),
    }
}
