use super::{JobApi, JobSpec};
use crate::config::JobConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Error body returned by the batch API
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobResource {
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatus {
    #[serde(default)]
    active: u32,
    #[serde(default)]
    succeeded: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    conditions: Vec<JobCondition>,
}

#[derive(Debug, Deserialize)]
struct JobCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

enum Progress {
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    fn progress(&self) -> Progress {
        let condition = |t: &str| {
            self.conditions
                .iter()
                .find(|c| c.condition_type == t && c.status == "True")
        };

        if let Some(failed) = condition("Failed") {
            Progress::Failed(
                failed
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed pods", self.failed)),
            )
        } else if self.succeeded > 0 || condition("Complete").is_some() {
            Progress::Succeeded
        } else {
            Progress::Running
        }
    }
}

/// Builder for a job [`Client`]
#[derive(Clone)]
pub struct ClientBuilder {
    reqwest_ca: Vec<reqwest::Certificate>,
    disable_cert_verification: bool,
    token: Option<String>,
    monitor_interval: Duration,
    retry_attempts: u32,
}

impl ClientBuilder {
    /// Create a new builder instance
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reqwest_ca: Vec::new(),
            disable_cert_verification: false,
            token: None,
            monitor_interval: Duration::from_millis(500),
            retry_attempts: 1800,
        }
    }

    /// Add every certificate of a PEM bundle on disk
    pub async fn add_root_certificate_file<P>(mut self, path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Debug,
    {
        tracing::debug!("loading CA bundle {:?}", path);
        let data = tokio::fs::read(path).await?;
        let certs = rustls_pemfile::certs(&mut data.as_slice())?;
        if certs.is_empty() {
            return Err(Error::general("no certificate found in CA bundle"));
        }
        for der in certs {
            self.reqwest_ca.push(reqwest::Certificate::from_der(&der)?);
        }
        Ok(self)
    }

    /// Disable certificate verification
    #[must_use]
    pub fn danger_accept_invalid_certs(self) -> Self {
        Self {
            disable_cert_verification: true,
            ..self
        }
    }

    /// Authenticate with a bearer token
    #[must_use]
    pub fn bearer_token(self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..self
        }
    }

    /// Delay between two job status polls
    #[must_use]
    pub fn monitor_interval(self, monitor_interval: Duration) -> Self {
        Self {
            monitor_interval,
            ..self
        }
    }

    /// Number of polls before a job is considered lost
    #[must_use]
    pub fn retry_attempts(self, retry_attempts: u32) -> Self {
        Self {
            retry_attempts,
            ..self
        }
    }

    /// Create the client for the API at `api_url`
    pub fn build(self, api_url: &str) -> Result<Client> {
        let client = reqwest::Client::builder();

        let client = self
            .reqwest_ca
            .iter()
            .fold(client, |client, ca| client.add_root_certificate(ca.clone()));

        let client = client
            .danger_accept_invalid_certs(self.disable_cert_verification)
            .build()?;

        Ok(Client {
            base_url: url::Url::parse(api_url)?.as_base(),
            token: self.token,
            client,
            monitor_interval: self.monitor_interval,
            retry_attempts: self.retry_attempts,
        })
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("root_certificates", &self.reqwest_ca.len())
            .field("disable_cert_verification", &self.disable_cert_verification)
            .field("monitor_interval", &self.monitor_interval)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch API client
#[derive(Clone)]
pub struct Client {
    base_url: url::Url,
    token: Option<String>,
    client: reqwest::Client,
    monitor_interval: Duration,
    retry_attempts: u32,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("monitor_interval", &self.monitor_interval)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

impl Client {
    /// Create a Client builder
    #[must_use]
    pub const fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client from the job configuration
    pub async fn from_config(config: &JobConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .monitor_interval(config.monitor_interval())
            .retry_attempts(config.retry_attempts);
        if let Some(token) = &config.token {
            builder = builder.bearer_token(token);
        }
        if let Some(ca) = &config.ca_cert {
            builder = builder.add_root_certificate_file(ca).await?;
        }
        if config.insecure {
            tracing::warn!("job API certificate verification disabled");
            builder = builder.danger_accept_invalid_certs();
        }
        builder.build(&config.api_url)
    }

    fn jobs_url(&self, namespace: &str) -> Result<url::Url> {
        Ok(self
            .base_url
            .join(&format!("apis/batch/v1/namespaces/{}/jobs", namespace))?)
    }

    fn job_url(&self, name: &str, namespace: &str) -> Result<url::Url> {
        Ok(self
            .base_url
            .join(&format!("apis/batch/v1/namespaces/{}/jobs/{}", namespace, name))?)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET a json payload from the API.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: url::Url) -> Result<T> {
        let result = self
            .authorize(self.client.get(url))
            .header("Accept", "application/json")
            .send()
            .await?;

        if result.status().is_success() {
            let res = result.json().await?;
            Ok(res)
        } else {
            Err(Self::api_error(result).await)
        }
    }

    /// POST a json payload to the API.
    pub async fn post_json(
        &self,
        url: url::Url,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        tracing::debug!("POST {} {:?}", url, data);

        let result = self
            .authorize(self.client.post(url))
            .json(data)
            .send()
            .await?;

        if result.status().is_success() {
            let resp = result.bytes().await?;
            if resp.is_empty() {
                Ok(serde_json::Value::Object(serde_json::Map::new()))
            } else {
                Ok(serde_json::from_slice(&resp)?)
            }
        } else {
            tracing::error!("POST call failed");
            Err(Self::api_error(result).await)
        }
    }

    async fn api_error(result: reqwest::Response) -> Error {
        let status = result.status();
        match result.json::<ApiStatus>().await {
            Ok(resp) => {
                tracing::debug!("API error reason {:?}", resp.reason);
                Error::WebServer(status.as_u16(), resp.message)
            }
            Err(_) => Error::WebServer(status.as_u16(), status.to_string()),
        }
    }
}

#[async_trait]
impl JobApi for Client {
    #[tracing::instrument(skip(self, spec), fields(job = %spec.name, namespace = %spec.namespace))]
    async fn create(&self, spec: &JobSpec) -> Result<()> {
        let url = self.jobs_url(&spec.namespace)?;
        self.post_json(url, &spec.manifest()).await?;
        tracing::info!("job created");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn monitor(&self, name: &str, namespace: &str) -> Result<()> {
        let url = self.job_url(name, namespace)?;

        for attempt in 0..self.retry_attempts {
            let job: JobResource = self.get_json(url.clone()).await?;
            match job.status.progress() {
                Progress::Succeeded => {
                    tracing::info!("job completed");
                    return Ok(());
                }
                Progress::Failed(reason) => {
                    tracing::error!("job failed: {}", reason);
                    return Err(Error::Job {
                        name: name.to_string(),
                        reason,
                    });
                }
                Progress::Running => {
                    tracing::trace!(attempt, active = job.status.active, "job still running");
                    tokio::time::sleep(self.monitor_interval).await;
                }
            }
        }

        Err(Error::Job {
            name: name.to_string(),
            reason: format!("not completed after {} checks", self.retry_attempts),
        })
    }
}

pub(crate) trait URLExt {
    fn as_base(self) -> Self;
}

impl URLExt for url::Url {
    /// Relative joins only append to a path ending with a slash
    fn as_base(mut self) -> Self {
        if !self.path().ends_with('/') {
            let path = format!("{}/", self.path());
            self.set_path(&path);
        }
        self
    }
}
