//! Credentialed HTTP access to the broker management API.
//!
//! Provides the bootstrap credentials, URL building for a single node, and a
//! transport abstraction so the rebalance probe can be exercised without a
//! live broker.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

/// Key of the bootstrap user entry in the bootstrap Secret.
pub const BOOTSTRAP_USER_KEY: &str = "bootstrap_user";

/// Errors that can occur while talking to the management API.
#[derive(Error, Debug)]
pub enum RequesterError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Timeout after {duration:?}: GET {url}")]
    Timeout { url: String, duration: Duration },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Management API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse a `username:password` bootstrap user entry.
    ///
    /// Only the first line is used. Returns `None` when either part is empty.
    pub fn from_bootstrap_user(raw: &str) -> Option<Self> {
        let line = raw.lines().next()?.trim();
        let (username, password) = line.split_once(':')?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }
}

/// Requests against one broker node.
#[derive(Clone, Debug)]
pub struct Requester {
    /// `host:port` of the node.
    pub host: String,
    pub credentials: Credentials,
}

impl Requester {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            credentials,
        }
    }

    /// Full URL for an API path on this node.
    ///
    /// The management API listener on the pod network is plain HTTP.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.host, path.trim_start_matches('/'))
    }

    /// Issue a single GET and return the HTTP status code.
    pub async fn get<T: ManagementTransport>(
        &self,
        transport: &T,
        path: &str,
    ) -> Result<u16, RequesterError> {
        transport.get(&self.url(path), &self.credentials).await
    }
}

/// Transport used to reach the management API.
pub trait ManagementTransport: Send + Sync {
    /// Issue a GET with basic credentials, returning the response status code.
    fn get(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<u16, RequesterError>> + Send;
}

/// `reqwest`-backed transport with a bounded per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, RequesterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(RequesterError::Client)?;
        Ok(Self { client, timeout })
    }
}

impl ManagementTransport for HttpTransport {
    #[instrument(skip(self, credentials))]
    async fn get(&self, url: &str, credentials: &Credentials) -> Result<u16, RequesterError> {
        let request = self
            .client
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| RequesterError::Timeout {
                url: url.to_string(),
                duration: self.timeout,
            })?
            .map_err(|source| {
                if source.is_timeout() {
                    RequesterError::Timeout {
                        url: url.to_string(),
                        duration: self.timeout,
                    }
                } else {
                    RequesterError::Transport {
                        url: url.to_string(),
                        source,
                    }
                }
            })?;

        let status = response.status().as_u16();
        debug!(status, "Management API responded");
        Ok(status)
    }
}
