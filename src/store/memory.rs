//!
//! In-memory [`RecordStore`].
//!
//! All tables sit behind one async mutex. A transaction holds the lock for
//! its whole lifetime and works on a staged copy of the tables which replaces
//! the live tables on commit, which makes every transaction serializable.
use super::{Error, Record, RecordStore, Result, Transaction};
use crate::cluster::ClusterStatus;
use crate::types::{Cluster, Host};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Operations that can be made to fail, see [`MemoryStore::inject`]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailPoint {
    /// Starting a transaction
    Begin,
    /// Any write inside a transaction
    Write,
    /// Committing a transaction
    Commit,
    /// Reading this cluster
    Read(Uuid),
    /// Listing all clusters
    List,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    clusters: BTreeMap<Uuid, Cluster>,
    hosts: BTreeMap<Uuid, Host>,
}

impl Tables {
    fn cluster(&self, id: Uuid) -> Result<Cluster> {
        let mut cluster = self
            .clusters
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(Record::Cluster, id))?;
        cluster.hosts = self.hosts_of(id);
        Ok(cluster)
    }

    fn hosts_of(&self, cluster_id: Uuid) -> Vec<Host> {
        self.hosts
            .values()
            .filter(|h| h.cluster_id == cluster_id)
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
struct FailPoints(Arc<std::sync::Mutex<HashSet<FailPoint>>>);

impl FailPoints {
    fn check(&self, point: FailPoint) -> Result<()> {
        let armed = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&point);
        if armed {
            tracing::debug!("failing {:?}", point);
            Err(Error::Injected(point))
        } else {
            Ok(())
        }
    }
}

/// In-memory record store, cheap to clone, all clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_points: FailPoints,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `point` operation fail until [`MemoryStore::clear`]
    pub fn inject(&self, point: FailPoint) {
        self.fail_points
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point);
    }

    /// Remove all injected failures
    pub fn clear(&self) {
        self.fail_points
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.fail_points.check(FailPoint::Begin)?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            fail_points: self.fail_points.clone(),
        }))
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Cluster> {
        self.fail_points.check(FailPoint::Read(id))?;
        self.tables.lock().await.cluster(id)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.fail_points.check(FailPoint::List)?;
        let tables = self.tables.lock().await;
        tables.clusters.keys().map(|id| tables.cluster(*id)).collect()
    }

    async fn get_host(&self, cluster_id: Uuid, host_id: Uuid) -> Result<Host> {
        self.tables
            .lock()
            .await
            .hosts
            .get(&host_id)
            .filter(|h| h.cluster_id == cluster_id)
            .cloned()
            .ok_or(Error::NotFound(Record::Host, host_id))
    }

    async fn create_host(&self, host: &Host) -> Result<()> {
        self.fail_points.check(FailPoint::Write)?;
        let mut tables = self.tables.lock().await;
        if !tables.clusters.contains_key(&host.cluster_id) {
            return Err(Error::NotFound(Record::Cluster, host.cluster_id));
        }
        if tables.hosts.contains_key(&host.id) {
            return Err(Error::AlreadyExists(Record::Host, host.id));
        }
        tables.hosts.insert(host.id, host.clone());
        Ok(())
    }

    async fn update_host(&self, host: &Host) -> Result<()> {
        self.fail_points.check(FailPoint::Write)?;
        let mut tables = self.tables.lock().await;
        match tables.hosts.get_mut(&host.id) {
            Some(stored) if stored.cluster_id == host.cluster_id => {
                *stored = host.clone();
                Ok(())
            }
            _ => Err(Error::NotFound(Record::Host, host.id)),
        }
    }

    async fn delete_hosts(&self, cluster_id: Uuid) -> Result<usize> {
        self.fail_points.check(FailPoint::Write)?;
        let mut tables = self.tables.lock().await;
        let before = tables.hosts.len();
        tables.hosts.retain(|_, h| h.cluster_id != cluster_id);
        Ok(before - tables.hosts.len())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    fail_points: FailPoints,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_cluster(&mut self, id: Uuid) -> Result<Cluster> {
        self.fail_points.check(FailPoint::Read(id))?;
        self.staged.cluster(id)
    }

    async fn insert_cluster(&mut self, cluster: &Cluster) -> Result<()> {
        self.fail_points.check(FailPoint::Write)?;
        if self.staged.clusters.contains_key(&cluster.id) {
            return Err(Error::AlreadyExists(Record::Cluster, cluster.id));
        }
        if let Some(host) = cluster
            .hosts
            .iter()
            .find(|h| self.staged.hosts.contains_key(&h.id))
        {
            return Err(Error::AlreadyExists(Record::Host, host.id));
        }
        for host in &cluster.hosts {
            let host = Host {
                cluster_id: cluster.id,
                ..host.clone()
            };
            self.staged.hosts.insert(host.id, host);
        }
        let row = Cluster {
            hosts: Vec::new(),
            ..cluster.clone()
        };
        self.staged.clusters.insert(cluster.id, row);
        Ok(())
    }

    async fn set_cluster_status(&mut self, id: Uuid, status: ClusterStatus) -> Result<()> {
        self.fail_points.check(FailPoint::Write)?;
        let cluster = self
            .staged
            .clusters
            .get_mut(&id)
            .ok_or(Error::NotFound(Record::Cluster, id))?;
        cluster.status = status.to_string();
        cluster.status_updated_at = Utc::now();
        Ok(())
    }

    async fn delete_cluster(&mut self, id: Uuid) -> Result<()> {
        self.fail_points.check(FailPoint::Write)?;
        self.staged
            .clusters
            .remove(&id)
            .ok_or(Error::NotFound(Record::Cluster, id))?;
        self.staged.hosts.retain(|_, h| h.cluster_id != id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.fail_points.check(FailPoint::Commit)?;
        let Self {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        tracing::trace!("transaction rolled back");
    }
}
