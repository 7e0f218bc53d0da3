//! Relationship store endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use discovery_core::{Relationship, RelationshipStore, ResourceRef, Result};

use crate::http::PlatformClient;

const LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipItems {
    items: Vec<Relationship>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[async_trait]
impl RelationshipStore for PlatformClient {
    async fn create(&self, relationships: &[Relationship]) -> Result<Vec<Relationship>> {
        let response: RelationshipItems = self
            .send_json(
                self.post("/relationships")
                    .json(&json!({ "items": relationships })),
            )
            .await?;
        Ok(response.items)
    }

    async fn retrieve(&self, external_ids: &[String]) -> Result<Vec<Relationship>> {
        let items: Vec<_> = external_ids
            .iter()
            .map(|id| json!({ "externalId": id }))
            .collect();
        let response: RelationshipItems = self
            .send_json(
                self.post("/relationships/byids")
                    .json(&json!({ "items": items, "ignoreUnknownIds": true })),
            )
            .await?;
        Ok(response.items)
    }

    async fn list_from(&self, resource: &ResourceRef) -> Result<Vec<Relationship>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({
                "filter": { "sources": [resource] },
                "limit": LIST_LIMIT,
            });
            if let Some(ref c) = cursor {
                body["cursor"] = json!(c);
            }
            let page: RelationshipItems = self
                .send_json(self.post("/relationships/list").json(&body))
                .await?;
            all.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(all)
    }
}
