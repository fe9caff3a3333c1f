//!
//! Records managed by the inventory.
//!
//! `Cluster` owns its `Host` records; a host only carries the id of its
//! cluster. Both statuses are kept as plain strings, the cluster status is
//! parsed into [`ClusterStatus`](crate::cluster::ClusterStatus) when an
//! operation is dispatched.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host status values reported by the host state machine.
pub mod host_status {
    #![allow(missing_docs)]
    pub const DISCOVERING: &str = "discovering";
    pub const KNOWN: &str = "known";
    pub const INSUFFICIENT: &str = "insufficient";
    pub const DISCONNECTED: &str = "disconnected";
    pub const INSTALLING: &str = "installing";
    pub const INSTALLED: &str = "installed";
    pub const ERROR: &str = "error";
}

/// Bare metal cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    /// Cluster id
    pub id: Uuid,
    /// Cluster name
    pub name: String,
    /// Current status, one of the cluster states once registered
    pub status: String,
    /// Optional cluster description
    #[serde(default)]
    pub description: Option<String>,
    /// Base DNS domain
    #[serde(default)]
    pub base_dns_domain: Option<String>,
    /// Virtual IP used to reach the API server
    #[serde(default)]
    pub api_vip: Option<std::net::IpAddr>,
    /// Virtual IP used for cluster ingress
    #[serde(default)]
    pub ingress_vip: Option<std::net::IpAddr>,
    /// Optional HTTP proxy used by the hosts
    #[serde(default)]
    pub http_proxy: Option<String>,
    /// SSH public key injected into the hosts
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    /// Hosts that belong to the cluster
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last time the status changed
    pub status_updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Build a cluster record from registration parameters, not yet in any state
    #[must_use]
    pub fn new(params: ClusterCreateParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: params.name,
            status: String::new(),
            description: params.description,
            base_dns_domain: params.base_dns_domain,
            api_vip: params.api_vip,
            ingress_vip: params.ingress_vip,
            http_proxy: params.http_proxy,
            ssh_public_key: params.ssh_public_key,
            hosts: Vec::new(),
            created_at: now,
            status_updated_at: now,
        }
    }
}

/// Parameters accepted when registering a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[allow(missing_docs)]
pub struct ClusterCreateParams {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_dns_domain: Option<String>,
    #[serde(default)]
    pub api_vip: Option<std::net::IpAddr>,
    #[serde(default)]
    pub ingress_vip: Option<std::net::IpAddr>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub ssh_public_key: Option<String>,
}

/// Role of a host in the cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HostRole {
    /// Control plane host
    Master,
    /// Worker host
    #[default]
    Worker,
}

/// A machine being provisioned into a cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Host {
    /// Host id
    pub id: Uuid,
    /// Owning cluster
    pub cluster_id: Uuid,
    /// Host role
    pub role: HostRole,
    /// Status reported by the host state machine
    pub status: String,
    /// Hardware inventory reported by the host agent
    #[serde(default)]
    pub inventory: Option<HostInventory>,
    /// Last installation progress reported by the host
    #[serde(default)]
    pub progress: Option<String>,
    /// Last time the host record changed
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// Create a host record in the given cluster
    #[must_use]
    pub fn new(cluster_id: Uuid, role: HostRole, status: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster_id,
            role,
            status: status.to_string(),
            inventory: None,
            progress: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach a hardware inventory
    #[must_use]
    pub fn with_inventory(self, inventory: HostInventory) -> Self {
        Self {
            inventory: Some(inventory),
            ..self
        }
    }
}

/// Hardware inventory of a host, only the parts the inventory looks at
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HostInventory {
    /// Block devices
    #[serde(default)]
    pub disks: Vec<Disk>,
}

/// Block device
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Disk {
    pub name: String,
    pub device_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub removable: bool,
}

/// Kind of instruction sent to a host agent
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// Collect the hardware inventory
    HardwareInfo,
    /// Check connectivity to the other hosts
    ConnectivityCheck,
    /// Report installation progress
    InstallProgress,
}

/// Instruction sent to a host agent
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    /// Instruction kind
    pub step_type: StepType,
}

/// Parameters used when generating the cluster discovery image
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageCreateParams {
    /// Proxy the discovery agent goes through
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// SSH key baked into the image
    #[serde(default)]
    pub ssh_public_key: Option<String>,
}
