//! In-memory platform fake for deterministic testing.
//!
//! Implements every collaborator trait with scripted job responses and an
//! in-memory file, relationship, and asset store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discovery_client::mock::{MockPlatform, ScriptedStatus};
//! use discovery_core::{JobKind, JobStatus};
//!
//! let platform = MockPlatform::new()
//!     .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
//!     .with_status(JobKind::PnidParse, ScriptedStatus::completed(json!({"items": []})));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use discovery_core::{
    ArtifactFetcher, Asset, AssetStore, Error, FileMetadata, FileStore, JobClient, JobId, JobKind,
    JobRequest, JobSnapshot, JobStatus, Page, Relationship, RelationshipStore, ResourceRef,
    Result, StoredFile,
};

/// Response to a job submission.
#[derive(Debug, Clone)]
pub enum ScriptedSubmit {
    Accept(JobId),
    Reject(u16),
}

/// Response to one status poll. The last scripted entry for a kind repeats.
#[derive(Debug, Clone)]
pub enum ScriptedStatus {
    /// `status` plus extra result fields merged into the body.
    Status(JobStatus, JsonValue),
    HttpError(u16),
}

impl ScriptedStatus {
    pub fn status(status: JobStatus) -> Self {
        ScriptedStatus::Status(status, json!({}))
    }

    pub fn completed(result: JsonValue) -> Self {
        ScriptedStatus::Status(JobStatus::Completed, result)
    }

    pub fn failed(message: &str) -> Self {
        ScriptedStatus::Status(JobStatus::Failed, json!({ "errorMessage": message }))
    }
}

/// One recorded call against the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: &'static str,
    pub job_kind: Option<JobKind>,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    submits: HashMap<JobKind, ScriptedSubmit>,
    statuses: HashMap<JobKind, Vec<ScriptedStatus>>,
    assets: Vec<Asset>,
    artifacts: HashMap<String, Vec<u8>>,
    download_links: HashMap<i64, String>,
    latency_ms: u64,
    fail_uploads: bool,
    fail_file_create: bool,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    status_cursor: HashMap<JobKind, usize>,
    next_file_id: i64,
    files: Vec<StoredFile>,
    uploads: HashMap<i64, Vec<u8>>,
    relationships: BTreeMap<String, Relationship>,
    link_failures_remaining: u32,
}

/// In-memory stand-in for the platform APIs.
#[derive(Clone, Default)]
pub struct MockPlatform {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the submission response for a job kind. Unscripted kinds are
    /// accepted with job id `1`.
    pub fn with_submit(mut self, kind: JobKind, response: ScriptedSubmit) -> Self {
        Arc::make_mut(&mut self.config)
            .submits
            .insert(kind, response);
        self
    }

    /// Append a status response for a job kind.
    pub fn with_status(mut self, kind: JobKind, response: ScriptedStatus) -> Self {
        Arc::make_mut(&mut self.config)
            .statuses
            .entry(kind)
            .or_default()
            .push(response);
        self
    }

    pub fn with_assets(mut self, assets: Vec<Asset>) -> Self {
        Arc::make_mut(&mut self.config).assets = assets;
        self
    }

    /// Content served by the artifact fetcher for `url`.
    pub fn with_artifact(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config)
            .artifacts
            .insert(url.into(), bytes.into());
        self
    }

    pub fn with_download_link(mut self, file_id: i64, url: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .download_links
            .insert(file_id, url.into());
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Make every content upload fail with HTTP 500.
    pub fn with_failing_uploads(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_uploads = true;
        self
    }

    /// Make file record creation fail with HTTP 500.
    pub fn with_failing_file_create(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_file_create = true;
        self
    }

    /// Fail the next `n` relationship creations with HTTP 503. Duplicate
    /// external ids are still reported as 409 first.
    pub fn fail_links(self, n: u32) -> Self {
        self.state.lock().unwrap().link_failures_remaining = n;
        self
    }

    /// Pre-populate a relationship, as if an earlier run had created it.
    pub fn with_relationship(self, relationship: Relationship) -> Self {
        self.state
            .lock()
            .unwrap()
            .relationships
            .insert(relationship.external_id.clone(), relationship);
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls to `operation`, optionally restricted to a job kind.
    pub fn call_count(&self, operation: &str, kind: Option<JobKind>) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == operation && (kind.is_none() || c.job_kind == kind))
            .count()
    }

    pub fn submit_count(&self, kind: JobKind) -> usize {
        self.call_count("submit", Some(kind))
    }

    pub fn status_count(&self, kind: JobKind) -> usize {
        self.call_count("status", Some(kind))
    }

    /// Files created so far.
    pub fn files(&self) -> Vec<StoredFile> {
        self.state.lock().unwrap().files.clone()
    }

    /// Content uploaded for a file.
    pub fn uploaded(&self, file_id: i64) -> Option<Vec<u8>> {
        self.state.lock().unwrap().uploads.get(&file_id).cloned()
    }

    /// All stored relationships, ordered by external id.
    pub fn relationships(&self) -> Vec<Relationship> {
        self.state
            .lock()
            .unwrap()
            .relationships
            .values()
            .cloned()
            .collect()
    }

    fn log_call(&self, operation: &'static str, job_kind: Option<JobKind>, detail: String) {
        self.state.lock().unwrap().calls.push(MockCall {
            operation,
            job_kind,
            detail,
        });
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn next_status(&self, kind: JobKind) -> ScriptedStatus {
        let script = match self.config.statuses.get(&kind) {
            Some(script) if !script.is_empty() => script,
            _ => return ScriptedStatus::completed(json!({})),
        };
        let mut state = self.state.lock().unwrap();
        let cursor = state.status_cursor.entry(kind).or_insert(0);
        let response = script[(*cursor).min(script.len() - 1)].clone();
        *cursor += 1;
        response
    }
}

fn http_error(status: u16, message: &str) -> Error {
    Error::Http {
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl JobClient for MockPlatform {
    async fn submit(&self, request: &JobRequest) -> Result<JobId> {
        self.log_call("submit", Some(request.kind), request.body.to_string());
        self.simulate_latency().await;
        match self.config.submits.get(&request.kind) {
            Some(ScriptedSubmit::Accept(id)) => Ok(id.clone()),
            Some(ScriptedSubmit::Reject(status)) => Err(http_error(*status, "submission rejected")),
            None => Ok(JobId::Number(1)),
        }
    }

    async fn status(&self, kind: JobKind, job_id: &JobId) -> Result<JobSnapshot> {
        self.log_call("status", Some(kind), job_id.to_string());
        self.simulate_latency().await;
        match self.next_status(kind) {
            ScriptedStatus::Status(status, extra) => {
                let mut body = json!({ "jobId": job_id, "status": status.to_string() });
                if let (Some(body), JsonValue::Object(extra)) = (body.as_object_mut(), extra) {
                    body.extend(extra);
                }
                JobSnapshot::from_body(job_id.clone(), body)
            }
            ScriptedStatus::HttpError(status) => Err(http_error(status, "status check failed")),
        }
    }
}

#[async_trait]
impl FileStore for MockPlatform {
    async fn create_file(&self, metadata: &FileMetadata) -> Result<StoredFile> {
        self.log_call("create_file", None, metadata.name.clone());
        self.simulate_latency().await;
        if self.config.fail_file_create {
            return Err(http_error(500, "file creation failed"));
        }
        let mut state = self.state.lock().unwrap();
        state.next_file_id += 1;
        let id = 1000 + state.next_file_id;
        let file = StoredFile {
            id,
            external_id: metadata.external_id.clone(),
            name: metadata.name.clone(),
            mime_type: metadata.mime_type.clone(),
            uploaded: false,
            upload_url: Some(format!("mock://upload/{}", id)),
        };
        state.files.push(file.clone());
        Ok(file)
    }

    async fn upload_content(&self, file: &StoredFile, bytes: &[u8]) -> Result<()> {
        self.log_call("upload_content", None, file.id.to_string());
        self.simulate_latency().await;
        if self.config.fail_uploads {
            return Err(http_error(500, "upload failed"));
        }
        let mut state = self.state.lock().unwrap();
        state.uploads.insert(file.id, bytes.to_vec());
        if let Some(stored) = state.files.iter_mut().find(|f| f.id == file.id) {
            stored.uploaded = true;
        }
        Ok(())
    }

    async fn download_link(&self, file_id: i64) -> Result<String> {
        self.log_call("download_link", None, file_id.to_string());
        self.config
            .download_links
            .get(&file_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No download link for file {}", file_id)))
    }
}

#[async_trait]
impl RelationshipStore for MockPlatform {
    async fn create(&self, relationships: &[Relationship]) -> Result<Vec<Relationship>> {
        let ids: Vec<_> = relationships.iter().map(|r| r.external_id.as_str()).collect();
        self.log_call("create_relationships", None, ids.join(","));
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if let Some(dup) = relationships
            .iter()
            .find(|r| state.relationships.contains_key(&r.external_id))
        {
            return Err(http_error(
                409,
                &format!("Duplicate external id: {}", dup.external_id),
            ));
        }
        if state.link_failures_remaining > 0 {
            state.link_failures_remaining -= 1;
            return Err(http_error(503, "service unavailable"));
        }
        for r in relationships {
            state.relationships.insert(r.external_id.clone(), r.clone());
        }
        Ok(relationships.to_vec())
    }

    async fn retrieve(&self, external_ids: &[String]) -> Result<Vec<Relationship>> {
        self.log_call("retrieve_relationships", None, external_ids.join(","));
        let state = self.state.lock().unwrap();
        Ok(external_ids
            .iter()
            .filter_map(|id| state.relationships.get(id).cloned())
            .collect())
    }

    async fn list_from(&self, resource: &ResourceRef) -> Result<Vec<Relationship>> {
        self.log_call("list_relationships", None, resource.resource_id.to_string());
        let state = self.state.lock().unwrap();
        Ok(state
            .relationships
            .values()
            .filter(|r| &r.source == resource)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssetStore for MockPlatform {
    async fn count(&self) -> Result<u64> {
        self.log_call("count_assets", None, String::new());
        Ok(self.config.assets.len() as u64)
    }

    /// Cursors are decimal offsets into the asset list.
    async fn list_page(&self, cursor: Option<&str>, limit: u32) -> Result<Page<Asset>> {
        self.log_call("list_assets", None, cursor.unwrap_or_default().to_string());
        self.simulate_latency().await;
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| http_error(400, "invalid cursor"))?,
            None => 0,
        };
        let end = (start + limit.max(1) as usize).min(self.config.assets.len());
        let items = self.config.assets.get(start..end).unwrap_or_default().to_vec();
        let next_cursor = (end < self.config.assets.len()).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }
}

#[async_trait]
impl ArtifactFetcher for MockPlatform {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.log_call("fetch", None, url.to_string());
        self.simulate_latency().await;
        self.config
            .artifacts
            .get(url)
            .cloned()
            .ok_or_else(|| http_error(404, "artifact not found"))
    }
}
