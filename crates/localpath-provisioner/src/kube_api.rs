//! [`ClusterClient`] over the Kubernetes REST API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::cluster::{ClusterClient, ClusterResult};
use crate::error::ClusterError;
use crate::pod::WorkerPod;

/// Where the service-account credentials are mounted inside a pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const POD_KIND: &str = "pod";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `Status` object returned by the API server on errors.
#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

/// Talks to the API server with a bearer token.
#[derive(Debug, Clone)]
pub struct KubeApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl KubeApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Builds a client from the in-cluster environment: the service host and
    /// port variables plus the mounted service-account token and CA bundle.
    pub fn in_cluster() -> ClusterResult<Self> {
        let host = env_var("KUBERNETES_SERVICE_HOST")?;
        let port = env_var("KUBERNETES_SERVICE_PORT")?;

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token")).map_err(|e| {
            ClusterError::Transport(format!("failed to read service account token: {}", e))
        })?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| ClusterError::Transport(format!("failed to read cluster CA: {}", e)))?;
        let cert = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| ClusterError::Transport(format!("invalid cluster CA: {}", e)))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(cert)
            .build()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: server_url(&host, &port),
            token: Some(token.trim().to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace)
    }

    fn pod_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.pods_url(namespace), name)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn env_var(key: &str) -> ClusterResult<String> {
    std::env::var(key).map_err(|_| ClusterError::Transport(format!("{} is not set", key)))
}

fn server_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{}]:{}", host, port)
    } else {
        format!("https://{}:{}", host, port)
    }
}

fn transport(e: reqwest::Error) -> ClusterError {
    ClusterError::Transport(e.to_string())
}

/// Maps a non-success response to a [`ClusterError`].
fn status_error(status: StatusCode, body: &str, name: &str) -> ClusterError {
    match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound {
            kind: POD_KIND,
            name: name.to_string(),
        },
        StatusCode::CONFLICT => ClusterError::AlreadyExists {
            kind: POD_KIND,
            name: name.to_string(),
        },
        _ => {
            let message = serde_json::from_str::<ApiStatus>(body)
                .map(|s| s.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| body.trim().to_string());
            ClusterError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// Decodes a Pod read back from the API server, which fills in defaults the
/// manifest never set.
fn decode_pod(body: &str) -> ClusterResult<WorkerPod> {
    serde_json::from_str(body).map_err(|e| ClusterError::Decode(e.to_string()))
}

async fn check(response: Response, name: &str) -> ClusterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, name))
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn get_task(&self, namespace: &str, name: &str) -> ClusterResult<Option<WorkerPod>> {
        let url = self.pod_url(namespace, name);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check(response, name).await?.text().await.map_err(transport)?;
        decode_pod(&body).map(Some)
    }

    async fn create_task(&self, pod: &WorkerPod) -> ClusterResult<()> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        debug!("POST {} for task {}", self.pods_url(namespace), pod.name());
        let response = self
            .authorize(self.client.post(self.pods_url(namespace)).json(pod))
            .send()
            .await
            .map_err(transport)?;
        check(response, pod.name()).await?;
        Ok(())
    }

    async fn delete_task(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let response = self
            .authorize(self.client.delete(self.pod_url(namespace, name)))
            .send()
            .await
            .map_err(transport)?;
        check(response, name).await?;
        Ok(())
    }
}
