//!
//! Host management.
//!
//! The host state machine itself lives outside the inventory; the cluster
//! side only needs the operations of [`HostApi`]. [`Manager`] implements them
//! over the record store.
use crate::config::ClusterPolicy;
use crate::store::RecordStore;
use crate::types::{host_status, Cluster, Disk, Host, HostInventory, HostRole, Step, StepType};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Operations on hosts used by the inventory and the installer
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Next instructions for the host agent
    async fn get_next_steps(&self, host: &Host) -> Result<Vec<Step>>;

    /// Record installation progress reported by the host
    async fn update_install_progress(&self, host: &Host, progress: &str) -> Result<()>;

    /// Disks the host can be installed on
    async fn valid_disks(&self, host: &Host) -> Result<Vec<Disk>>;

    /// Start installing the host
    async fn install(&self, host: &Host) -> Result<()>;

    /// Ids of the master hosts of a cluster
    async fn master_node_ids(&self, cluster: &Cluster) -> Result<Vec<Uuid>>;
}

/// Hardware eligibility rules
pub trait HardwareValidator: Send + Sync {
    /// Disks of `inventory` usable as installation target
    fn valid_disks(&self, inventory: &HostInventory) -> Vec<Disk>;
}

/// Accepts writable, non removable disks above a minimum size
#[derive(Clone, Copy, Debug)]
pub struct DiskValidator {
    /// Smallest acceptable disk
    pub min_disk_size_bytes: u64,
}

impl Default for DiskValidator {
    fn default() -> Self {
        Self {
            min_disk_size_bytes: 120 * 1024 * 1024 * 1024,
        }
    }
}

impl HardwareValidator for DiskValidator {
    fn valid_disks(&self, inventory: &HostInventory) -> Vec<Disk> {
        inventory
            .disks
            .iter()
            .filter(|d| !d.read_only && !d.removable && d.size_bytes >= self.min_disk_size_bytes)
            .cloned()
            .collect()
    }
}

/// [`HostApi`] over the record store
pub struct Manager {
    store: Arc<dyn RecordStore>,
    validator: Arc<dyn HardwareValidator>,
    policy: ClusterPolicy,
}

impl Manager {
    /// Create a host manager
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        validator: Arc<dyn HardwareValidator>,
        policy: ClusterPolicy,
    ) -> Self {
        Self {
            store,
            validator,
            policy,
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HostApi for Manager {
    async fn get_next_steps(&self, host: &Host) -> Result<Vec<Step>> {
        let steps: &[StepType] = match host.status.as_str() {
            host_status::DISCOVERING => &[StepType::HardwareInfo],
            host_status::KNOWN | host_status::INSUFFICIENT | host_status::DISCONNECTED => {
                &[StepType::HardwareInfo, StepType::ConnectivityCheck]
            }
            host_status::INSTALLING => &[StepType::InstallProgress],
            _ => &[],
        };
        Ok(steps
            .iter()
            .map(|step_type| Step {
                step_type: *step_type,
            })
            .collect())
    }

    #[tracing::instrument(skip(self, host), fields(host_id = %host.id), level = "debug")]
    async fn update_install_progress(&self, host: &Host, progress: &str) -> Result<()> {
        let mut host = self.store.get_host(host.cluster_id, host.id).await?;
        host.progress = Some(progress.to_string());
        host.updated_at = Utc::now();
        self.store.update_host(&host).await?;
        tracing::debug!("install progress: {}", progress);
        Ok(())
    }

    async fn valid_disks(&self, host: &Host) -> Result<Vec<Disk>> {
        let inventory = host.inventory.as_ref().ok_or_else(|| Error::Host {
            host_id: host.id,
            reason: "no hardware inventory reported".to_string(),
        })?;
        Ok(self.validator.valid_disks(inventory))
    }

    #[tracing::instrument(skip(self, host), fields(host_id = %host.id))]
    async fn install(&self, host: &Host) -> Result<()> {
        let mut host = self.store.get_host(host.cluster_id, host.id).await?;
        if !self.policy.is_usable(&host.status) {
            return Err(Error::Host {
                host_id: host.id,
                reason: format!("cannot install host in {} status", host.status),
            });
        }
        host.status = host_status::INSTALLING.to_string();
        host.updated_at = Utc::now();
        self.store.update_host(&host).await?;
        tracing::info!("host installation started");
        Ok(())
    }

    async fn master_node_ids(&self, cluster: &Cluster) -> Result<Vec<Uuid>> {
        let cluster = self.store.get_cluster(cluster.id).await?;
        Ok(cluster
            .hosts
            .iter()
            .filter(|h| h.role == HostRole::Master)
            .map(|h| h.id)
            .collect())
    }
}
