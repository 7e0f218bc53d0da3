//! Contextualization job endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use discovery_core::{JobClient, JobId, JobKind, JobRequest, JobSnapshot, Result};

use crate::http::PlatformClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: JobId,
}

#[async_trait]
impl JobClient for PlatformClient {
    async fn submit(&self, request: &JobRequest) -> Result<JobId> {
        debug!(job_kind = %request.kind, "Submitting job");
        let response: SubmitResponse = self
            .send_json(self.post(request.kind.submit_path()).json(&request.body))
            .await?;
        Ok(response.job_id)
    }

    async fn status(&self, kind: JobKind, job_id: &JobId) -> Result<JobSnapshot> {
        let body: JsonValue = self.send_json(self.get(&kind.status_path(job_id))).await?;
        JobSnapshot::from_body(job_id.clone(), body)
    }
}
