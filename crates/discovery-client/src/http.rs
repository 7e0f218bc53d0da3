//! Shared HTTP plumbing for the platform REST API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use discovery_core::{Error, Result};

use crate::config::ApiConfig;
use crate::error::error_from_response;

/// Authenticated client for one platform project.
///
/// Implements every collaborator trait in `discovery_core::traits`; cheap to
/// clone since `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    pub(crate) client: Client,
    config: ApiConfig,
    project_url: String,
}

impl PlatformClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            url = %config.base_url,
            project = %config.project,
            "Initializing platform client"
        );

        let project_url = config.project_url();
        Ok(Self {
            client,
            config,
            project_url,
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.project_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.config.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Authenticated POST to a project-scoped path.
    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    /// Authenticated GET to a project-scoped path.
    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    /// Send a request and decode a JSON success body.
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    /// Send a request, mapping non-success statuses to [`Error::Http`].
    pub(crate) async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = req.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "Platform response");
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}
