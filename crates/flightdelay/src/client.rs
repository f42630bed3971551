//! HTTP client for the lookup service.
//!
//! [`LookupClient`] speaks the JSON API served by [`crate::server`]. A client
//! without an identity registers one on first use; callers that want to keep
//! it across runs can persist it with [`save_identity`].

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::lookup::{ErrorBody, LookupRequest, LookupResponse, RegisterResponse};
use crate::server::HealthResponse;

/// Client for the lookup service API.
#[derive(Debug, Clone)]
pub struct LookupClient {
    client: reqwest::Client,
    base_url: String,
    identity_id: Option<String>,
}

impl LookupClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flightdelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            identity_id: config
                .identity_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
        })
    }

    /// Use `identity_id` for subsequent lookups.
    #[must_use]
    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// The identity presented on lookups, if any.
    #[must_use]
    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Decode a success body, or turn an error body into [`Error::Service`].
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (Some(body.code), body.error),
            Err(_) if text.is_empty() => (None, default_message(status)),
            Err(_) => (None, text),
        };
        Err(Error::Service {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Check that the service is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached or is unhealthy.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        Self::decode(response).await
    }

    /// Register a new identity without adopting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service refuses it.
    pub async fn register(&self) -> Result<RegisterResponse> {
        debug!("Registering with {}", self.base_url);
        let response = self.client.post(self.url("/register")).send().await?;
        Self::decode(response).await
    }

    /// Return the configured identity, registering one if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if registration is needed and fails.
    pub async fn ensure_identity(&mut self) -> Result<String> {
        if let Some(id) = &self.identity_id {
            return Ok(id.clone());
        }

        let registered = self.register().await?;
        info!(
            "Registered identity {} (daily limit {})",
            registered.identity_id, registered.daily_limit
        );
        self.identity_id = Some(registered.identity_id.clone());
        Ok(registered.identity_id)
    }

    /// Send a lookup as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] when the service refuses the lookup, or an
    /// HTTP error if it cannot be reached.
    pub async fn lookup(&self, request: &LookupRequest) -> Result<LookupResponse> {
        debug!("Looking up {:?}", request.flight_number);
        let response = self
            .client
            .post(self.url("/lookup"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Look up `flight_number` under this client's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if no identity is set, or as [`LookupClient::lookup`].
    pub async fn lookup_flight(&self, flight_number: &str) -> Result<LookupResponse> {
        let identity = self.identity_id.as_deref().ok_or(Error::NoClientIdentity)?;
        self.lookup(&LookupRequest::new(identity, flight_number)).await
    }
}

fn default_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

/// Read a previously saved identity.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn load_identity(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let id = content.trim();
            Ok((!id.is_empty()).then(|| id.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Save an identity for later runs, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_identity(path: &Path, identity_id: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    std::fs::write(path, format!("{identity_id}\n"))?;
    Ok(())
}
