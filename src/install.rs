//!
//! Cluster installation.
//!
//! [`Installer::install`] moves a ready cluster to `installing`, starts every
//! host and launches the installation job. Only the first step writes the
//! cluster status; whether the installation ends `installed` or `error` is
//! decided later by the monitor from the host statuses.
use crate::cluster::StateMachine;
use crate::config::{ImageConfig, JobConfig};
use crate::host::HostApi;
use crate::job::{JobApi, JobSpec};
use crate::store::RecordStore;
use crate::types::Cluster;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A host that could not be started
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostFailure {
    /// Host
    pub host_id: Uuid,
    /// What went wrong
    pub reason: String,
}

/// Outcome of a successful installation request
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallReport {
    /// Cluster
    pub cluster_id: Uuid,
    /// Master hosts handed to the installation job
    pub masters: Vec<Uuid>,
    /// Hosts that failed to start, the job was launched regardless
    pub host_failures: Vec<HostFailure>,
}

/// Name of the installation job of a cluster
#[must_use]
pub fn install_job_name(cluster_id: Uuid) -> String {
    format!("install-{}", cluster_id)
}

/// Installation coordinator
pub struct Installer {
    store: Arc<dyn RecordStore>,
    state: Arc<StateMachine>,
    hosts: Arc<dyn HostApi>,
    jobs: Arc<dyn JobApi>,
    images: ImageConfig,
    job: JobConfig,
}

impl Installer {
    /// Create an installer
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        state: Arc<StateMachine>,
        hosts: Arc<dyn HostApi>,
        jobs: Arc<dyn JobApi>,
        images: ImageConfig,
        job: JobConfig,
    ) -> Self {
        Self {
            store,
            state,
            hosts,
            jobs,
            images,
            job,
        }
    }

    /// Install `cluster`, which must be `ready`
    #[tracing::instrument(skip(self, cluster), fields(cluster_id = %cluster.id))]
    pub async fn install(&self, cluster: &Cluster) -> Result<InstallReport> {
        self.state.install(cluster).await?;

        let masters = self.hosts.master_node_ids(cluster).await.map_err(|e| {
            tracing::error!(error = %e, "failed to resolve master hosts");
            Error::MasterResolution {
                cluster_id: cluster.id,
                reason: e.to_string(),
            }
        })?;
        if masters.is_empty() {
            tracing::error!("cluster has no master hosts");
            return Err(Error::MasterResolution {
                cluster_id: cluster.id,
                reason: "no master hosts".to_string(),
            });
        }

        let host_failures = self.start_hosts(cluster.id).await?;

        let spec = self.install_job(cluster.id, &masters);
        self.jobs.create(&spec).await.map_err(|e| {
            tracing::error!(job = %spec.name, error = %e, "failed to create installation job");
            job_error(&spec, &e)
        })?;
        self.jobs
            .monitor(&spec.name, &spec.namespace)
            .await
            .map_err(|e| {
                tracing::error!(job = %spec.name, error = %e, "installation job failed");
                job_error(&spec, &e)
            })?;

        tracing::info!(
            masters = masters.len(),
            failed_hosts = host_failures.len(),
            "installation job completed"
        );
        Ok(InstallReport {
            cluster_id: cluster.id,
            masters,
            host_failures,
        })
    }

    /// Start every host of the cluster, collecting the ones that failed
    async fn start_hosts(&self, cluster_id: Uuid) -> Result<Vec<HostFailure>> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        let mut failures = Vec::new();

        for host in &cluster.hosts {
            let started = match self.hosts.valid_disks(host).await {
                Ok(disks) if disks.is_empty() => Err(Error::Host {
                    host_id: host.id,
                    reason: "no valid installation disk".to_string(),
                }),
                Ok(_) => self.hosts.install(host).await,
                Err(e) => Err(e),
            };

            if let Err(e) = started {
                tracing::warn!(host_id = %host.id, error = %e, "failed to start host installation");
                failures.push(HostFailure {
                    host_id: host.id,
                    reason: e.to_string(),
                });
            }
        }
        Ok(failures)
    }

    fn install_job(&self, cluster_id: Uuid, masters: &[Uuid]) -> JobSpec {
        let masters = masters
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        JobSpec::new(
            &install_job_name(cluster_id),
            &self.job.namespace,
            &self.images.installer_image,
            self.job.backoff_limit,
        )
        .env("CLUSTER_ID", &cluster_id.to_string())
        .env("MASTER_HOSTS", &masters)
    }
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("images", &self.images)
            .field("namespace", &self.job.namespace)
            .finish_non_exhaustive()
    }
}

pub(crate) fn job_error(spec: &JobSpec, e: &Error) -> Error {
    Error::Job {
        name: spec.name.clone(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::host::HostApi;
    use crate::job::{JobApi, JobSpec};
    use crate::types::{Cluster, Disk, Host, Step};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Records created jobs, fails on demand
    #[derive(Clone, Debug, Default)]
    pub(crate) struct FakeJobs {
        pub(crate) created: Arc<Mutex<Vec<JobSpec>>>,
        pub(crate) monitored: Arc<Mutex<Vec<(String, String)>>>,
        pub(crate) fail_create: bool,
        pub(crate) fail_monitor: bool,
    }

    #[async_trait]
    impl JobApi for FakeJobs {
        async fn create(&self, spec: &JobSpec) -> Result<()> {
            if self.fail_create {
                return Err(Error::WebServer(500, "create refused".into()));
            }
            self.created.lock().unwrap().push(spec.clone());
            Ok(())
        }

        async fn monitor(&self, name: &str, namespace: &str) -> Result<()> {
            self.monitored
                .lock()
                .unwrap()
                .push((name.to_string(), namespace.to_string()));
            if self.fail_monitor {
                return Err(Error::Job {
                    name: name.to_string(),
                    reason: "BackoffLimitExceeded".into(),
                });
            }
            Ok(())
        }
    }

    /// Every host has one valid disk unless listed in `no_disks`
    #[derive(Clone, Debug, Default)]
    pub(crate) struct FakeHosts {
        pub(crate) masters: Option<Vec<Uuid>>,
        pub(crate) no_disks: HashSet<Uuid>,
        pub(crate) fail_install: HashSet<Uuid>,
        pub(crate) installed: Arc<Mutex<Vec<Uuid>>>,
        pub(crate) progress: Arc<Mutex<Vec<(Uuid, String)>>>,
    }

    #[async_trait]
    impl HostApi for FakeHosts {
        async fn get_next_steps(&self, _host: &Host) -> Result<Vec<Step>> {
            Ok(Vec::new())
        }

        async fn update_install_progress(&self, host: &Host, progress: &str) -> Result<()> {
            self.progress
                .lock()
                .unwrap()
                .push((host.id, progress.to_string()));
            Ok(())
        }

        async fn valid_disks(&self, host: &Host) -> Result<Vec<Disk>> {
            if self.no_disks.contains(&host.id) {
                Ok(Vec::new())
            } else {
                Ok(vec![Disk {
                    name: "sda".into(),
                    size_bytes: 1 << 40,
                    ..Default::default()
                }])
            }
        }

        async fn install(&self, host: &Host) -> Result<()> {
            if self.fail_install.contains(&host.id) {
                return Err(Error::Host {
                    host_id: host.id,
                    reason: "agent unreachable".into(),
                });
            }
            self.installed.lock().unwrap().push(host.id);
            Ok(())
        }

        async fn master_node_ids(&self, cluster: &Cluster) -> Result<Vec<Uuid>> {
            match &self.masters {
                Some(masters) => Ok(masters.clone()),
                None => Err(Error::General(format!("no masters for {}", cluster.id))),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::fakes::{FakeHosts, FakeJobs};
    use super::*;
    use crate::cluster::test_utils::{cluster_with_hosts, policy, status_of};
    use crate::store::MemoryStore;
    use crate::ErrorKind;
    use std::collections::HashSet;

    fn installer(store: &MemoryStore, hosts: FakeHosts, jobs: FakeJobs) -> Installer {
        let state = StateMachine::new(Arc::new(store.clone()), (*policy()).clone());
        Installer::new(
            Arc::new(store.clone()),
            Arc::new(state),
            Arc::new(hosts),
            Arc::new(jobs),
            ImageConfig::default(),
            JobConfig {
                namespace: "assisted".into(),
                ..JobConfig::default()
            },
        )
    }

    fn ids(cluster: &Cluster) -> Vec<Uuid> {
        cluster.hosts.iter().map(|h| h.id).collect()
    }

    #[tokio::test]
    async fn install_ready_cluster() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let hosts = FakeHosts {
            masters: Some(ids(&cluster)),
            ..Default::default()
        };
        let jobs = FakeJobs::default();

        let report = installer(&store, hosts.clone(), jobs.clone())
            .install(&cluster)
            .await
            .unwrap();

        assert_eq!(report.cluster_id, cluster.id);
        assert_eq!(report.masters, ids(&cluster));
        assert!(report.host_failures.is_empty());
        assert_eq!(status_of(&store, cluster.id).await, "installing");
        assert_eq!(hosts.installed.lock().unwrap().len(), 3);

        let created = jobs.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, format!("install-{}", cluster.id));
        assert_eq!(created[0].namespace, "assisted");
        assert_eq!(created[0].image, ImageConfig::default().installer_image);
        let master_env = created[0].env.get("MASTER_HOSTS").unwrap();
        assert_eq!(master_env.split(',').count(), 3);
        assert_eq!(
            *jobs.monitored.lock().unwrap(),
            vec![(created[0].name.clone(), "assisted".to_string())]
        );
    }

    #[tokio::test]
    async fn install_requires_ready() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "insufficient", &["known"]).await;
        let jobs = FakeJobs::default();

        let err = installer(&store, FakeHosts::default(), jobs.clone())
            .install(&cluster)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(status_of(&store, cluster.id).await, "insufficient");
        assert!(jobs.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_create_failure_keeps_installing() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let hosts = FakeHosts {
            masters: Some(ids(&cluster)),
            ..Default::default()
        };
        let jobs = FakeJobs {
            fail_create: true,
            ..Default::default()
        };

        let err = installer(&store, hosts, jobs.clone())
            .install(&cluster)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job { ref name, .. } if name.starts_with("install-")));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(status_of(&store, cluster.id).await, "installing");
        assert!(jobs.monitored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_monitor_failure() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let hosts = FakeHosts {
            masters: Some(ids(&cluster)),
            ..Default::default()
        };
        let jobs = FakeJobs {
            fail_monitor: true,
            ..Default::default()
        };

        let err = installer(&store, hosts, jobs).install(&cluster).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(status_of(&store, cluster.id).await, "installing");
    }

    #[tokio::test]
    async fn master_resolution_failure() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let hosts = FakeHosts::default();
        let jobs = FakeJobs::default();

        let err = installer(&store, hosts.clone(), jobs.clone())
            .install(&cluster)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MasterResolution { cluster_id, .. } if cluster_id == cluster.id
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(status_of(&store, cluster.id).await, "installing");
        assert!(hosts.installed.lock().unwrap().is_empty());
        assert!(jobs.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_master_list() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let hosts = FakeHosts {
            masters: Some(Vec::new()),
            ..Default::default()
        };
        let jobs = FakeJobs::default();

        let err = installer(&store, hosts.clone(), jobs.clone())
            .install(&cluster)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MasterResolution { cluster_id, ref reason }
                if cluster_id == cluster.id && reason == "no master hosts"
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(status_of(&store, cluster.id).await, "installing");
        assert!(hosts.installed.lock().unwrap().is_empty());
        assert!(jobs.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn host_failures_do_not_abort() {
        let store = MemoryStore::new();
        let cluster = cluster_with_hosts(&store, "ready", &["known"; 3]).await;
        let [a, b, c] = [cluster.hosts[0].id, cluster.hosts[1].id, cluster.hosts[2].id];
        let hosts = FakeHosts {
            masters: Some(ids(&cluster)),
            no_disks: HashSet::from([a]),
            fail_install: HashSet::from([b]),
            ..Default::default()
        };
        let jobs = FakeJobs::default();

        let report = installer(&store, hosts.clone(), jobs.clone())
            .install(&cluster)
            .await
            .unwrap();

        let mut failed: Vec<Uuid> = report.host_failures.iter().map(|f| f.host_id).collect();
        failed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(failed, expected);
        assert_eq!(*hosts.installed.lock().unwrap(), vec![c]);
        assert_eq!(jobs.created.lock().unwrap().len(), 1);
    }
}
