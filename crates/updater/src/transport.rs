use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Abstraction over fetching update documents and artefacts.
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    /// Fetch the whole body at `url` into memory.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes>;

    /// Stream the body at `url` into `dest`, truncating it first. Returns the
    /// number of bytes written.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Builder for [`HttpTransport`].
#[derive(Default)]
pub struct HttpTransportBuilder {
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    download_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpTransportBuilder {
    /// Timeout for establishing a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Overall timeout for in-memory fetches (manifest documents).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Overall timeout for a single artefact download.
    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// `User-Agent` header sent with every request.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpTransport> {
        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let download_timeout = self.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let client = Client::builder()
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .user_agent(
                self.user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .build()?;

        Ok(HttpTransport {
            client,
            request_timeout,
            download_timeout,
        })
    }
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_USER_AGENT: &str = concat!("shell-updater/", env!("CARGO_PKG_VERSION"));

/// HTTP(S) transport backed by reqwest. Redirects are followed and any
/// non-success status is reported as a network failure.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl HttpTransport {
    /// Create a new builder.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }
}

#[async_trait]
impl ArtifactTransport for HttpTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?
            .error_for_status()?;

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(target: "updater", %url, bytes = written, "download finished");
        Ok(written)
    }
}
