//! HTTP client for the collector API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use tokio::time::timeout;
use url::Url;

use crate::agent::AgentError;
use crate::collector::{LogUpload, RegisterRequest, UploadAck};
use crate::config::CollectorEndpoint;
use crate::storage::ReportSnapshot;

/// The calls an agent makes against the collector.
#[async_trait::async_trait]
pub trait CollectorApi: Send + Sync + 'static {
    async fn register(&self, probe_id: &str, display_name: &str) -> Result<(), AgentError>;

    async fn heartbeat(&self, probe_id: &str) -> Result<(), AgentError>;

    async fn upload_report(&self, probe_id: &str, report: &ReportSnapshot)
    -> Result<(), AgentError>;

    /// Upload a log tail. A stale chunk comes back as an ack with `accepted: false`.
    async fn upload_logs(&self, probe_id: &str, upload: &LogUpload)
    -> Result<UploadAck, AgentError>;
}

/// reqwest-backed [`CollectorApi`].
#[derive(Clone)]
pub struct HttpCollectorClient {
    client: Client,
    base: Url,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl std::fmt::Debug for HttpCollectorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCollectorClient")
            .field("base", &self.base.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpCollectorClient {
    /// Create a client for the collector at `base_url`.
    ///
    /// # Errors
    /// Returns `AgentError::Config` if the URL is invalid or the client cannot be built.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        upload_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| AgentError::Config(format!("invalid collector url '{base_url}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("fleetwatch-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            request_timeout,
            upload_timeout,
        })
    }

    pub fn from_config(config: &CollectorEndpoint) -> Result<Self, AgentError> {
        Self::new(&config.url, config.timeout, config.upload_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url, AgentError> {
        self.base
            .join(path)
            .map_err(|e| AgentError::Config(format!("invalid endpoint '{path}': {e}")))
    }

    /// Send a request and return the response body of a 2xx answer.
    async fn send(&self, request: RequestBuilder, limit: Duration) -> Result<String, AgentError> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match timeout(limit, exchange).await {
            Err(_) => Err(AgentError::Timeout(limit)),
            Ok(Err(e)) if e.is_timeout() => Err(AgentError::Timeout(limit)),
            Ok(Err(e)) => Err(AgentError::Unavailable(e.to_string())),
            Ok(Ok((status, body))) if status.is_success() => Ok(body),
            Ok(Ok((status, body))) => Err(AgentError::Rejected {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait::async_trait]
impl CollectorApi for HttpCollectorClient {
    async fn register(&self, probe_id: &str, display_name: &str) -> Result<(), AgentError> {
        let url = self.endpoint("api/probe/register")?;
        let body = RegisterRequest {
            probe_id: probe_id.to_string(),
            display_name: display_name.to_string(),
        };
        self.send(self.client.post(url).json(&body), self.request_timeout)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, probe_id: &str) -> Result<(), AgentError> {
        let url = self.endpoint(&format!("api/probe/{probe_id}/heartbeat"))?;
        self.send(self.client.post(url), self.request_timeout)
            .await?;
        Ok(())
    }

    async fn upload_report(
        &self,
        probe_id: &str,
        report: &ReportSnapshot,
    ) -> Result<(), AgentError> {
        let url = self.endpoint(&format!("api/probe/{probe_id}/report"))?;
        self.send(self.client.post(url).json(report), self.upload_timeout)
            .await?;
        Ok(())
    }

    async fn upload_logs(
        &self,
        probe_id: &str,
        upload: &LogUpload,
    ) -> Result<UploadAck, AgentError> {
        let url = self.endpoint(&format!("api/probe/{probe_id}/logs"))?;
        let body = self
            .send(self.client.post(url).json(upload), self.request_timeout)
            .await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(probe_id = %probe_id, error = %e, "Unreadable log upload ack");
            AgentError::InvalidResponse(format!("log upload ack: {e}"))
        })
    }
}
