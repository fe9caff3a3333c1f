//!
//! Record store for clusters and hosts.
//!
//! Every cluster status write goes through a [`Transaction`]. A transaction
//! that is dropped without [`Transaction::commit`] is rolled back, so early
//! returns and panics never leave a half applied write behind.
use crate::cluster::ClusterStatus;
use crate::types::{Cluster, Host};
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;

pub use memory::{FailPoint, MemoryStore};

/// Kind of record, used in error messages
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Record {
    /// Cluster record
    Cluster,
    /// Host record
    Host,
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Host => f.write_str("host"),
        }
    }
}

/// Error returned by the record store
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The record does not exist
    #[error("{0} {1} not found")]
    NotFound(Record, Uuid),

    /// A record with the same id already exists
    #[error("{0} {1} already exists")]
    AlreadyExists(Record, Uuid),

    /// Failure injected through a [`FailPoint`]
    #[error("injected failure at {0:?}")]
    Injected(FailPoint),

    /// The store is no longer usable
    #[error("store closed")]
    Closed,
}

/// Result type of the record store
pub type Result<T> = std::result::Result<T, Error>;

/// Transactional record store shared by the monitor and all request handlers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Start a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Read a cluster with its hosts
    async fn get_cluster(&self, id: Uuid) -> Result<Cluster>;

    /// Read all clusters with their hosts
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    /// Read a single host of a cluster
    async fn get_host(&self, cluster_id: Uuid, host_id: Uuid) -> Result<Host>;

    /// Add a host to an existing cluster
    async fn create_host(&self, host: &Host) -> Result<()>;

    /// Replace a host record
    async fn update_host(&self, host: &Host) -> Result<()>;

    /// Remove every host of a cluster, returns the number removed
    async fn delete_hosts(&self, cluster_id: Uuid) -> Result<usize>;
}

/// A unit of work against the [`RecordStore`].
///
/// Reads inside a transaction observe every write committed before the
/// transaction started; nothing written inside it is visible to others
/// before `commit`.
#[async_trait]
pub trait Transaction: Send {
    /// Read a cluster with its hosts
    async fn get_cluster(&mut self, id: Uuid) -> Result<Cluster>;

    /// Insert a cluster together with its hosts
    async fn insert_cluster(&mut self, cluster: &Cluster) -> Result<()>;

    /// Write a new cluster status
    async fn set_cluster_status(&mut self, id: Uuid, status: ClusterStatus) -> Result<()>;

    /// Delete a cluster and every host it owns
    async fn delete_cluster(&mut self, id: Uuid) -> Result<()>;

    /// Make the writes visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the writes
    async fn rollback(self: Box<Self>);
}
