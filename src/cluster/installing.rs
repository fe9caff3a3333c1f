//!
//! Installation in progress. Resolved from the host aggregate into
//! `installed` or `error`, never back into a pre-install status.
use super::{invalid_state, Base, ClusterStatus, StateHandler, UpdateReply};
use crate::types::Cluster;
use crate::Result;
use async_trait::async_trait;

pub(crate) struct Installing {
    base: Base,
}

impl Installing {
    pub(crate) const fn new(base: Base) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StateHandler for Installing {
    async fn register_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("register", cluster, ClusterStatus::Installing))
    }

    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id), level = "debug")]
    async fn refresh_status(&self, cluster: &Cluster) -> Result<UpdateReply> {
        self.base
            .transition(cluster, ClusterStatus::Installing, |hosts| {
                let outcome = hosts.installation_outcome();
                if outcome == ClusterStatus::Error {
                    tracing::warn!(
                        total = hosts.total,
                        installed = hosts.installed,
                        failed = hosts.failed,
                        "cluster installation failed"
                    );
                }
                outcome
            })
            .await
    }

    async fn install(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("install", cluster, ClusterStatus::Installing))
    }

    async fn deregister_cluster(&self, cluster: &Cluster) -> Result<UpdateReply> {
        Err(invalid_state("deregister", cluster, ClusterStatus::Installing))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::test_utils::{cluster_with_hosts, policy, status_of};
    use crate::store::MemoryStore;
    use crate::Error;
    use std::sync::Arc;

    async fn refresh(hosts: &[&str]) -> (UpdateReply, String) {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "installing", hosts).await;
        let state = Installing::new(Base::new(Arc::new(store.clone()), policy()));
        let reply = state.refresh_status(&cluster).await.unwrap();
        (reply, status_of(&store, cluster.id).await)
    }

    #[tokio::test]
    async fn installing_to_installing() {
        let (reply, stored) = refresh(&["installing", "installing", "installing"]).await;
        assert_eq!(reply, UpdateReply::unchanged(ClusterStatus::Installing));
        assert_eq!(stored, "installing");
    }

    #[tokio::test]
    async fn installing_to_installing_some_hosts_installed() {
        let (reply, stored) = refresh(&["installing", "installed", "installed"]).await;
        assert_eq!(reply, UpdateReply::unchanged(ClusterStatus::Installing));
        assert_eq!(stored, "installing");
    }

    #[tokio::test]
    async fn installing_to_installed() {
        let (reply, stored) = refresh(&["installed", "installed", "installed"]).await;
        assert_eq!(reply, UpdateReply::changed(ClusterStatus::Installed));
        assert_eq!(stored, "installed");
    }

    #[tokio::test]
    async fn installing_to_error_host_failed() {
        let (reply, stored) = refresh(&["error", "installed", "installed"]).await;
        assert_eq!(reply, UpdateReply::changed(ClusterStatus::Error));
        assert_eq!(stored, "error");
    }

    #[tokio::test]
    async fn installing_to_error_too_few_hosts() {
        for hosts in [
            &["installed", "installed"][..],
            &["installing", "installed"][..],
            &["installed"][..],
            &[][..],
        ] {
            let (reply, stored) = refresh(hosts).await;
            assert_eq!(reply, UpdateReply::changed(ClusterStatus::Error), "{:?}", hosts);
            assert_eq!(stored, "error");
        }
    }

    #[tokio::test]
    async fn deregister_is_rejected() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "installing", &["installing"; 3]).await;
        let state = Installing::new(Base::new(Arc::new(store.clone()), policy()));

        assert!(matches!(
            state.deregister_cluster(&cluster).await,
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            state.install(&cluster).await,
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(status_of(&store, cluster.id).await, "installing");
    }
}
