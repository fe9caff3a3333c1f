//!
//! Service configuration.
//!
//! Read either from the environment, see [`Config::from_env`], or from a JSON
//! document, see [`Config::load`]. Every setting has a default.
//!
//! | Variable | Setting |
//! |---|---|
//! | `CLUSTER_MONITOR_TIME_LOOP` | monitor period in microseconds |
//! | `CLUSTER_MIN_MASTERS` | usable masters required to be ready |
//! | `CLUSTER_MIN_INSTALLED_HOSTS` | hosts required to finish an installation |
//! | `HOST_USABLE_STATUSES` | comma separated host statuses usable for installation |
//! | `IMAGE_BUILDER`, `AGENT_DOCKER_IMAGE`, `INSTALLER_IMAGE` | job images |
//! | `S3_ENDPOINT_URL`, `S3_BUCKET` | where generated images are uploaded |
//! | `JOB_NAMESPACE`, `JOB_API_URL`, `JOB_API_TOKEN`, `JOB_CA_CERT` | job platform access |
//! | `JOB_INSECURE` | skip certificate verification of the job API |
//! | `JOB_MONITOR_INTERVAL_MS`, `JOB_RETRY_ATTEMPTS`, `JOB_BACKOFF_LIMIT` | job polling |
use crate::types::host_status;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top level configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Period of the cluster monitor in microseconds
    pub monitor_interval_us: u64,
    /// Readiness and installation policy
    pub policy: ClusterPolicy,
    /// Images used by jobs
    pub images: ImageConfig,
    /// Job platform
    pub job: JobConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_interval_us: 500,
            policy: ClusterPolicy::default(),
            images: ImageConfig::default(),
            job: JobConfig::default(),
        }
    }
}

impl Config {
    /// Monitor period
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_micros(self.monitor_interval_us)
    }

    /// Read the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration from a JSON file
    pub async fn load<P: AsRef<std::path::Path> + std::fmt::Debug>(path: P) -> Result<Self> {
        tracing::debug!("loading configuration from {:?}", path);
        let data = tokio::fs::read(path).await?;
        let config = serde_json::from_slice(&data)?;
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let ClusterPolicy {
            min_masters,
            min_installed_hosts,
            usable_host_statuses,
            installed_host_statuses,
            failed_host_statuses,
        } = defaults.policy;
        let policy = ClusterPolicy {
            min_masters: env.parse("CLUSTER_MIN_MASTERS", min_masters)?,
            min_installed_hosts: env.parse("CLUSTER_MIN_INSTALLED_HOSTS", min_installed_hosts)?,
            usable_host_statuses: env.list("HOST_USABLE_STATUSES", usable_host_statuses),
            installed_host_statuses,
            failed_host_statuses,
        };

        let images = ImageConfig {
            image_builder: env.string("IMAGE_BUILDER", defaults.images.image_builder),
            agent_image: env.string("AGENT_DOCKER_IMAGE", defaults.images.agent_image),
            installer_image: env.string("INSTALLER_IMAGE", defaults.images.installer_image),
            s3_endpoint_url: env.string("S3_ENDPOINT_URL", defaults.images.s3_endpoint_url),
            s3_bucket: env.string("S3_BUCKET", defaults.images.s3_bucket),
        };

        let job = JobConfig {
            namespace: env.string("JOB_NAMESPACE", defaults.job.namespace),
            api_url: env.string("JOB_API_URL", defaults.job.api_url),
            token: env.get("JOB_API_TOKEN").or(defaults.job.token),
            ca_cert: env.get("JOB_CA_CERT").map(Into::into).or(defaults.job.ca_cert),
            insecure: env.parse("JOB_INSECURE", defaults.job.insecure)?,
            monitor_interval_ms: env.parse(
                "JOB_MONITOR_INTERVAL_MS",
                defaults.job.monitor_interval_ms,
            )?,
            retry_attempts: env.parse("JOB_RETRY_ATTEMPTS", defaults.job.retry_attempts)?,
            backoff_limit: env.parse("JOB_BACKOFF_LIMIT", defaults.job.backoff_limit)?,
        };

        Ok(Self {
            monitor_interval_us: env.parse(
                "CLUSTER_MONITOR_TIME_LOOP",
                defaults.monitor_interval_us,
            )?,
            policy,
            images,
            job,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn string(&self, name: &str, default: String) -> String {
        self.get(name).unwrap_or(default)
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e))),
        }
    }

    fn list(&self, name: &str, default: Vec<String>) -> Vec<String> {
        self.get(name).map_or(default, |value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Which host statuses count for what, and how many hosts are needed.
///
/// The defaults mirror the behaviour the inventory has always had: three
/// masters in `known` make a cluster ready, three hosts must report
/// `installed` to complete an installation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClusterPolicy {
    /// Usable masters required to move to `ready`
    pub min_masters: usize,
    /// Hosts required before an installation can complete
    pub min_installed_hosts: usize,
    /// Host statuses usable for installation
    pub usable_host_statuses: Vec<String>,
    /// Host statuses meaning the host is installed
    pub installed_host_statuses: Vec<String>,
    /// Host statuses meaning the host failed
    pub failed_host_statuses: Vec<String>,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            min_masters: 3,
            min_installed_hosts: 3,
            usable_host_statuses: vec![host_status::KNOWN.to_string()],
            installed_host_statuses: vec![host_status::INSTALLED.to_string()],
            failed_host_statuses: vec![host_status::ERROR.to_string()],
        }
    }
}

impl ClusterPolicy {
    /// Host can take part in an installation
    #[must_use]
    pub fn is_usable(&self, status: &str) -> bool {
        self.usable_host_statuses.iter().any(|s| s == status)
    }

    /// Host finished installing
    #[must_use]
    pub fn is_installed(&self, status: &str) -> bool {
        self.installed_host_statuses.iter().any(|s| s == status)
    }

    /// Host failed
    #[must_use]
    pub fn is_failed(&self, status: &str) -> bool {
        self.failed_host_statuses.iter().any(|s| s == status)
    }
}

/// Container images and upload target used by jobs
#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageConfig {
    pub image_builder: String,
    pub agent_image: String,
    pub installer_image: String,
    pub s3_endpoint_url: String,
    pub s3_bucket: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            image_builder: "quay.io/ocpmetal/installer-image-build:latest".to_string(),
            agent_image: "quay.io/ocpmetal/agent:latest".to_string(),
            installer_image: "quay.io/ocpmetal/installer:latest".to_string(),
            s3_endpoint_url: "http://10.35.59.36:30925".to_string(),
            s3_bucket: "test".to_string(),
        }
    }
}

/// Job platform access and polling
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct JobConfig {
    /// Namespace jobs are created in
    pub namespace: String,
    /// Base URL of the job API
    pub api_url: String,
    /// Bearer token
    pub token: Option<String>,
    /// Extra PEM root certificate(s)
    pub ca_cert: Option<std::path::PathBuf>,
    /// Skip certificate verification of the job API
    pub insecure: bool,
    /// Delay between two job status polls
    pub monitor_interval_ms: u64,
    /// Number of polls before giving up on a job
    pub retry_attempts: u32,
    /// Retries the platform makes before marking the job failed
    pub backoff_limit: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            api_url: "https://kubernetes.default.svc".to_string(),
            token: None,
            ca_cert: None,
            insecure: false,
            monitor_interval_ms: 500,
            retry_attempts: 1800,
            backoff_limit: 2,
        }
    }
}

impl JobConfig {
    /// Delay between two job status polls
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.monitor_interval(), Duration::from_micros(500));
        assert_eq!(config.policy.min_masters, 3);
        assert!(!config.job.insecure);
        assert!(config.policy.is_usable("known"));
        assert!(!config.policy.is_usable("discovering"));
    }

    #[test]
    fn from_environment() {
        let config = from_vars(&[
            ("CLUSTER_MONITOR_TIME_LOOP", "1000"),
            ("CLUSTER_MIN_MASTERS", "1"),
            ("HOST_USABLE_STATUSES", "known, insufficient,"),
            ("JOB_NAMESPACE", "assisted"),
            ("JOB_API_TOKEN", "secret"),
            ("JOB_RETRY_ATTEMPTS", "10"),
            ("JOB_INSECURE", "true"),
        ])
        .unwrap();

        assert_eq!(config.monitor_interval(), Duration::from_millis(1));
        assert_eq!(config.policy.min_masters, 1);
        assert_eq!(
            config.policy.usable_host_statuses,
            vec!["known".to_string(), "insufficient".to_string()]
        );
        assert_eq!(config.job.namespace, "assisted");
        assert_eq!(config.job.token.as_deref(), Some("secret"));
        assert_eq!(config.job.retry_attempts, 10);
        assert!(config.job.insecure);
        assert_eq!(config.policy.min_installed_hosts, 3);
    }

    #[test]
    fn malformed_value() {
        let err = from_vars(&[("CLUSTER_MIN_MASTERS", "three")]).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.starts_with("CLUSTER_MIN_MASTERS")));
    }

    #[test]
    fn partial_json() {
        let config: Config = serde_json::from_str(
            r#"{"monitor-interval-us":250,"policy":{"min-masters":5},"job":{"namespace":"jobs"}}"#,
        )
        .unwrap();
        assert_eq!(config.monitor_interval_us, 250);
        assert_eq!(config.policy.min_masters, 5);
        assert_eq!(config.policy.usable_host_statuses, vec!["known".to_string()]);
        assert_eq!(config.job.namespace, "jobs");
        assert_eq!(config.job.monitor_interval_ms, 500);
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = Config::load("/nonexistent/bm-inventory.json").await.unwrap_err();
        assert!(matches!(err, Error::IO(_)));
    }
}
