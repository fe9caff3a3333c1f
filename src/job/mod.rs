//!
//! Orchestration jobs.
//!
//! Image generation and cluster installation run as containerized jobs on an
//! external platform. [`JobApi`] is all the inventory needs from it;
//! [`Client`] implements it against a Kubernetes style batch API.
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

mod client;

pub use client::{Client, ClientBuilder};

/// Create and follow jobs on the orchestration platform
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a job
    async fn create(&self, spec: &JobSpec) -> Result<()>;

    /// Wait until the job completes, fails if the job did not succeed
    async fn monitor(&self, name: &str, namespace: &str) -> Result<()>;
}

/// A single container job
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct JobSpec {
    /// Job name, unique in the namespace
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Environment of the container
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Retries before the job is marked failed
    pub backoff_limit: u32,
}

impl JobSpec {
    /// Create a job spec without environment, the image entrypoint runs
    #[must_use]
    pub fn new(name: &str, namespace: &str, image: &str, backoff_limit: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            image: image.to_string(),
            env: BTreeMap::new(),
            backoff_limit,
        }
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    /// Batch API representation of the job
    #[must_use]
    pub fn manifest(&self) -> serde_json::Value {
        let env: Vec<serde_json::Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let container = json!({
            "name": self.name,
            "image": self.image,
            "imagePullPolicy": "IfNotPresent",
            "env": env,
        });

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
            },
            "spec": {
                "backoffLimit": self.backoff_limit,
                "template": {
                    "metadata": { "name": self.name },
                    "spec": {
                        "containers": [container],
                        "restartPolicy": "Never",
                    },
                },
            },
        })
    }
}
