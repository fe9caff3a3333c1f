//!
//! Inventory service for bare-metal clusters.
//!
//! Clusters are registered, become ready once enough master hosts are usable,
//! get installed through an external job platform and end up `installed` or
//! `error`. The cluster status is never written from outside the
//! [`cluster::StateMachine`]; a background [`monitor::ClusterMonitor`]
//! re-derives it from the host statuses on a fixed period.
//!
//! ## Register and install a cluster
//! ```no_run
//! #[tokio::main]
//! async fn main() -> Result<(), bm_inventory::Error> {
//!     use bm_inventory::{config::Config, inventory::Inventory, job, store::MemoryStore};
//!     use bm_inventory::host::{DiskValidator, Manager};
//!     use bm_inventory::types::ClusterCreateParams;
//!     use std::sync::Arc;
//!
//!     let config = Config::from_env()?;
//!     let store = Arc::new(MemoryStore::new());
//!     let jobs = Arc::new(job::Client::from_config(&config.job).await?);
//!     let hosts = Arc::new(Manager::new(
//!         store.clone(),
//!         Arc::new(DiskValidator::default()),
//!         config.policy.clone(),
//!     ));
//!     let inventory = Inventory::new(store, hosts, jobs, &config);
//!
//!     let cluster = inventory
//!         .register_cluster(ClusterCreateParams {
//!             name: "edge-1".to_string(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     // Hosts register and report `known`, the monitor moves the cluster to `ready`
//!     let report = inventory.install_cluster(cluster.id).await?;
//!     println!("installed masters {:?}", report.masters);
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

use uuid::Uuid;

pub mod cluster;
pub mod config;
pub mod host;
pub mod install;
pub mod inventory;
pub mod job;
pub mod monitor;
pub mod store;
pub mod types;

/// Error returned by inventory functions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cluster status is empty or not one the state machine knows
    #[error("Unsupported cluster status {0:?}")]
    UnsupportedStatus(String),

    /// The operation is not allowed in the current cluster status
    #[error("Cannot {operation} cluster {cluster_id} in {status} status")]
    InvalidState {
        /// Requested operation
        operation: &'static str,
        /// Cluster
        cluster_id: Uuid,
        /// Status found
        status: String,
    },

    /// The cluster no longer has enough usable masters to install
    #[error("Cluster {0} is not ready for installation")]
    NotReady(Uuid),

    /// A store read or write outside of a status transition failed
    #[error("Store: {0}")]
    Store(#[from] store::Error),

    /// A status transaction failed and was rolled back, `reply` holds the
    /// status the cluster kept
    #[error("Persistence error, cluster stays {}: {source}", reply.state)]
    Persistence {
        /// Reply reflecting the status before the transaction
        reply: cluster::UpdateReply,
        /// Store failure
        #[source]
        source: store::Error,
    },

    /// The host data of a cluster could not be read
    #[error("Failed to aggregate hosts of cluster {cluster_id}: {source}")]
    Aggregate {
        /// Cluster
        cluster_id: Uuid,
        /// Store failure
        #[source]
        source: store::Error,
    },

    /// A host operation was refused
    #[error("Host {host_id}: {reason}")]
    Host {
        /// Host
        host_id: Uuid,
        /// Why the host was refused
        reason: String,
    },

    /// The master hosts of a cluster could not be resolved
    #[error("Failed to resolve masters of cluster {cluster_id}: {reason}")]
    MasterResolution {
        /// Cluster
        cluster_id: Uuid,
        /// Underlying failure
        reason: String,
    },

    /// Job creation or monitoring failed
    #[error("Job {name} failed: {reason}")]
    Job {
        /// Job name
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed returned by the HTTP server
    #[error("HTTP failed {0}, {1}")]
    WebServer(u16, String),

    /// JSON serialization/deserialization error
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL: {0}")]
    URL(#[from] url::ParseError),

    /// HTTP client error
    #[error("Reqwest: {0}")]
    HTTPClient(#[from] reqwest::Error),

    /// IO Errors
    #[error("IO error {0}")]
    IO(#[from] std::io::Error),

    /// General Error
    #[error("Error {0}")]
    General(String),
}

/// How a caller should report an [`Error`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The request itself is wrong
    BadRequest,
    /// The cluster or host does not exist
    NotFound,
    /// The request conflicts with the current state
    Conflict,
    /// Server side failure
    Internal,
}

impl Error {
    /// Create a general error
    #[must_use]
    pub fn general(err: &str) -> Self {
        Self::General(err.to_string())
    }

    /// Classify the error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedStatus(_) | Self::Config(_) => ErrorKind::BadRequest,
            Self::InvalidState { .. }
            | Self::NotReady(_)
            | Self::Host { .. }
            | Self::MasterResolution { .. } => ErrorKind::Conflict,
            Self::Store(source)
            | Self::Persistence { source, .. }
            | Self::Aggregate { source, .. } => match source {
                store::Error::NotFound(..) => ErrorKind::NotFound,
                store::Error::AlreadyExists(..) => ErrorKind::Conflict,
                store::Error::Injected(_) | store::Error::Closed => ErrorKind::Internal,
            },
            Self::Job { .. }
            | Self::WebServer(..)
            | Self::Serde(_)
            | Self::URL(_)
            | Self::HTTPClient(_)
            | Self::IO(_)
            | Self::General(_) => ErrorKind::Internal,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
