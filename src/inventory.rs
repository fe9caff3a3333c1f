//!
//! Inventory operations.
//!
//! [`Inventory`] is what a request handler calls. Errors carry an
//! [`ErrorKind`](crate::ErrorKind) telling whether the request was bad, the
//! record missing, the cluster in the wrong state or the server at fault.
use crate::cluster::{ClusterStatus, StateMachine, UpdateReply};
use crate::config::{Config, ImageConfig, JobConfig};
use crate::host::HostApi;
use crate::install::{job_error, InstallReport, Installer};
use crate::job::{JobApi, JobSpec};
use crate::monitor::ClusterMonitor;
use crate::store::RecordStore;
use crate::types::{Cluster, ClusterCreateParams, ImageCreateParams, Step};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Name of the image generation job of a cluster
#[must_use]
pub fn image_job_name(cluster_id: Uuid) -> String {
    format!("create-image-{}", cluster_id)
}

/// Cluster and host operations of the inventory service
pub struct Inventory {
    store: Arc<dyn RecordStore>,
    state: Arc<StateMachine>,
    hosts: Arc<dyn HostApi>,
    jobs: Arc<dyn JobApi>,
    installer: Installer,
    images: ImageConfig,
    job: JobConfig,
    monitor_interval: Duration,
}

impl Inventory {
    /// Create the inventory over its collaborators
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        hosts: Arc<dyn HostApi>,
        jobs: Arc<dyn JobApi>,
        config: &Config,
    ) -> Self {
        let state = Arc::new(StateMachine::new(store.clone(), config.policy.clone()));
        let installer = Installer::new(
            store.clone(),
            state.clone(),
            hosts.clone(),
            jobs.clone(),
            config.images.clone(),
            config.job.clone(),
        );
        Self {
            store,
            state,
            hosts,
            jobs,
            installer,
            images: config.images.clone(),
            job: config.job.clone(),
            monitor_interval: config.monitor_interval(),
        }
    }

    /// Monitor reconciling the clusters of this inventory
    #[must_use]
    pub fn monitor(&self) -> ClusterMonitor {
        ClusterMonitor::new(self.store.clone(), self.state.clone(), self.monitor_interval)
    }

    /// Register a new cluster, it starts `insufficient`
    #[tracing::instrument(skip(self, params), fields(name = %params.name))]
    pub async fn register_cluster(&self, params: ClusterCreateParams) -> Result<Cluster> {
        let mut cluster = Cluster::new(params);
        cluster.status = ClusterStatus::Insufficient.to_string();

        self.state.register_cluster(&cluster).await?;
        tracing::info!(cluster_id = %cluster.id, "cluster registered");
        Ok(self.store.get_cluster(cluster.id).await?)
    }

    /// Delete a cluster and its hosts
    #[tracing::instrument(skip(self))]
    pub async fn deregister_cluster(&self, cluster_id: Uuid) -> Result<UpdateReply> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        self.state.deregister_cluster(&cluster).await
    }

    /// Read a cluster with its hosts
    pub async fn get_cluster(&self, cluster_id: Uuid) -> Result<Cluster> {
        Ok(self.store.get_cluster(cluster_id).await?)
    }

    /// Read every cluster
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.store.list_clusters().await?)
    }

    /// Next instructions for a host agent
    pub async fn get_next_steps(&self, cluster_id: Uuid, host_id: Uuid) -> Result<Vec<Step>> {
        let host = self.store.get_host(cluster_id, host_id).await?;
        self.hosts.get_next_steps(&host).await
    }

    /// Record installation progress reported by a host.
    ///
    /// Agents keep reporting whatever happens, so failures are only logged.
    pub async fn update_host_install_progress(
        &self,
        cluster_id: Uuid,
        host_id: Uuid,
        progress: &str,
    ) -> Result<()> {
        let host = match self.store.get_host(cluster_id, host_id).await {
            Ok(host) => host,
            Err(e) => {
                tracing::warn!(%cluster_id, %host_id, error = %e, "progress for unknown host");
                return Ok(());
            }
        };

        if let Err(e) = self.hosts.update_install_progress(&host, progress).await {
            tracing::warn!(%cluster_id, %host_id, error = %e, "failed to record install progress");
        }
        Ok(())
    }

    /// Build the discovery image of a cluster
    #[tracing::instrument(skip(self, params))]
    pub async fn generate_cluster_iso(
        &self,
        cluster_id: Uuid,
        params: ImageCreateParams,
    ) -> Result<()> {
        let cluster = self.store.get_cluster(cluster_id).await?;

        let spec = self.image_job(&cluster, &params);
        self.jobs.create(&spec).await.map_err(|e| {
            tracing::error!(job = %spec.name, error = %e, "failed to create image job");
            job_error(&spec, &e)
        })?;
        self.jobs
            .monitor(&spec.name, &spec.namespace)
            .await
            .map_err(|e| {
                tracing::error!(job = %spec.name, error = %e, "image job failed");
                job_error(&spec, &e)
            })?;

        tracing::info!("cluster image generated");
        Ok(())
    }

    /// Install a `ready` cluster
    pub async fn install_cluster(&self, cluster_id: Uuid) -> Result<InstallReport> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        self.installer.install(&cluster).await
    }

    fn image_job(&self, cluster: &Cluster, params: &ImageCreateParams) -> JobSpec {
        let mut spec = JobSpec::new(
            &image_job_name(cluster.id),
            &self.job.namespace,
            &self.images.image_builder,
            self.job.backoff_limit,
        )
        .env("CLUSTER_ID", &cluster.id.to_string())
        .env("AGENT_IMAGE", &self.images.agent_image)
        .env("S3_ENDPOINT_URL", &self.images.s3_endpoint_url)
        .env("S3_BUCKET", &self.images.s3_bucket);

        if let Some(proxy) = params.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            spec = spec.env("PROXY_URL", proxy);
        }
        let ssh_key = params
            .ssh_public_key
            .as_deref()
            .or(cluster.ssh_public_key.as_deref());
        if let Some(key) = ssh_key {
            spec = spec.env("SSH_PUBLIC_KEY", key);
        }
        spec
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("installer", &self.installer)
            .field("monitor_interval", &self.monitor_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::test_utils::{cluster_with_hosts, status_of};
    use crate::install::fakes::{FakeHosts, FakeJobs};
    use crate::store::MemoryStore;
    use crate::types::{Host, HostRole};
    use crate::{Error, ErrorKind};

    fn inventory(store: &MemoryStore, hosts: FakeHosts, jobs: FakeJobs) -> Inventory {
        Inventory::new(
            Arc::new(store.clone()),
            Arc::new(hosts),
            Arc::new(jobs),
            &Config::default(),
        )
    }

    fn params(name: &str) -> ClusterCreateParams {
        ClusterCreateParams {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn register_and_read_back() {
        let store = MemoryStore::new();
        let inventory = inventory(&store, FakeHosts::default(), FakeJobs::default());

        let cluster = inventory.register_cluster(params("edge")).await.unwrap();
        assert_eq!(cluster.status, "insufficient");
        assert!(cluster.hosts.is_empty());

        let read = inventory.get_cluster(cluster.id).await.unwrap();
        assert_eq!(read.status, "insufficient");
        assert_eq!(read.name, "edge");
        assert_eq!(inventory.list_clusters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deregister_ready_cluster() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let inventory = inventory(&store, FakeHosts::default(), FakeJobs::default());

        let reply = inventory.deregister_cluster(cluster.id).await.unwrap();
        assert_eq!(reply.state, "unregistered");
        assert!(reply.is_changed);

        let err = inventory.get_cluster(cluster.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let host = &cluster.hosts[0];
        let err = inventory
            .get_next_steps(cluster.id, host.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = inventory.deregister_cluster(cluster.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn next_steps_of_unknown_host() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "insufficient", &["known"]).await;
        let inventory = inventory(&store, FakeHosts::default(), FakeJobs::default());

        assert!(inventory
            .get_next_steps(cluster.id, cluster.hosts[0].id)
            .await
            .is_ok());
        let err = inventory
            .get_next_steps(cluster.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn progress_is_never_an_error() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "installing", &["installing"]).await;
        let hosts = FakeHosts::default();
        let inventory = inventory(&store, hosts.clone(), FakeJobs::default());

        inventory
            .update_host_install_progress(cluster.id, cluster.hosts[0].id, "rebooting")
            .await
            .unwrap();
        inventory
            .update_host_install_progress(cluster.id, Uuid::new_v4(), "rebooting")
            .await
            .unwrap();

        assert_eq!(
            *hosts.progress.lock().unwrap(),
            vec![(cluster.hosts[0].id, "rebooting".to_string())]
        );
    }

    #[tokio::test]
    async fn generate_iso() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "insufficient", &[]).await;
        let jobs = FakeJobs::default();
        let inventory = inventory(&store, FakeHosts::default(), jobs.clone());

        inventory
            .generate_cluster_iso(cluster.id, ImageCreateParams::default())
            .await
            .unwrap();
        inventory
            .generate_cluster_iso(
                cluster.id,
                ImageCreateParams {
                    proxy_url: Some("http://1.1.1.1:1234".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let created = jobs.created.lock().unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].name, format!("create-image-{}", cluster.id));
        assert_eq!(created[0].namespace, "default");
        assert_eq!(created[0].image, ImageConfig::default().image_builder);
        assert_eq!(created[0].env.get("S3_BUCKET").map(String::as_str), Some("test"));
        assert!(!created[0].env.contains_key("PROXY_URL"));
        assert_eq!(
            created[1].env.get("PROXY_URL").map(String::as_str),
            Some("http://1.1.1.1:1234")
        );
        assert_eq!(jobs.monitored.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn generate_iso_failures() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "insufficient", &[]).await;

        let err = inventory(&store, FakeHosts::default(), FakeJobs::default())
            .generate_cluster_iso(Uuid::new_v4(), ImageCreateParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let jobs = FakeJobs {
            fail_create: true,
            ..Default::default()
        };
        let err = inventory(&store, FakeHosts::default(), jobs.clone())
            .generate_cluster_iso(cluster.id, ImageCreateParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(jobs.monitored.lock().unwrap().is_empty());

        let jobs = FakeJobs {
            fail_monitor: true,
            ..Default::default()
        };
        let err = inventory(&store, FakeHosts::default(), jobs)
            .generate_cluster_iso(cluster.id, ImageCreateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn install_after_monitor_tick() {
        let store = MemoryStore::new();
        let jobs = FakeJobs::default();
        let mut hosts = FakeHosts::default();
        let inventory_for = |hosts: FakeHosts| inventory(&store, hosts, jobs.clone());

        let cluster = inventory_for(FakeHosts::default())
            .register_cluster(params("edge"))
            .await
            .unwrap();
        let masters: Vec<Host> = (0..3)
            .map(|_| Host::new(cluster.id, HostRole::Master, "known"))
            .collect();
        for host in &masters {
            store.create_host(host).await.unwrap();
        }
        hosts.masters = Some(masters.iter().map(|h| h.id).collect());
        let inventory = inventory_for(hosts);

        let err = inventory.install_cluster(cluster.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        inventory.monitor().tick().await;
        assert_eq!(status_of(&store, cluster.id).await, "ready");

        let report = inventory.install_cluster(cluster.id).await.unwrap();
        assert_eq!(report.masters.len(), 3);
        assert_eq!(status_of(&store, cluster.id).await, "installing");

        let err = inventory.install_cluster(cluster.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(jobs.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "insufficient", &[]).await;
        let inventory = inventory(&store, FakeHosts::default(), FakeJobs::default());

        let err = inventory
            .state
            .register_cluster(&cluster)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
