//! Asset endpoints and the artifact fetcher.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use discovery_core::{ArtifactFetcher, Asset, AssetStore, Error, Page, Result};

use crate::error::error_from_response;
use crate::http::PlatformClient;

#[derive(Debug, Deserialize)]
struct AggregateItem {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    items: Vec<AggregateItem>,
}

#[async_trait]
impl AssetStore for PlatformClient {
    async fn count(&self) -> Result<u64> {
        let response: AggregateResponse = self
            .send_json(self.post("/assets/aggregate").json(&json!({ "filter": {} })))
            .await?;
        response
            .items
            .first()
            .map(|item| item.count)
            .ok_or_else(|| Error::Serialization("Aggregate response has no items".to_string()))
    }

    async fn list_page(&self, cursor: Option<&str>, limit: u32) -> Result<Page<Asset>> {
        let mut body = json!({ "limit": limit });
        if let Some(c) = cursor {
            body["cursor"] = json!(c);
        }
        self.send_json(self.post("/assets/list").json(&body)).await
    }
}

/// Signed URLs carry their own credentials, so no bearer token is sent.
#[async_trait]
impl ArtifactFetcher for PlatformClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "Fetched artifact");
        Ok(bytes.to_vec())
    }
}
