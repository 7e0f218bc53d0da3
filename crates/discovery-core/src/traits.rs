//! Collaborator traits for the remote platform.
//!
//! Every flow receives its collaborators as `Arc<dyn Trait>` handles, so
//! the HTTP implementations in `discovery-client` and the in-memory fakes
//! used by tests are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Asset, FileMetadata, JobId, JobKind, JobRequest, JobSnapshot, Page, Relationship, ResourceRef,
    StoredFile,
};

/// Starts contextualization jobs and reports their status.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Start a job. A non-success response is an error.
    async fn submit(&self, request: &JobRequest) -> Result<JobId>;

    /// Fetch the current status of a job.
    async fn status(&self, kind: JobKind, job_id: &JobId) -> Result<JobSnapshot>;
}

/// Remote file storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Create a file record. The returned file carries an upload URL.
    async fn create_file(&self, metadata: &FileMetadata) -> Result<StoredFile>;

    /// Upload the file's content to the URL returned by `create_file`.
    async fn upload_content(&self, file: &StoredFile, bytes: &[u8]) -> Result<()>;

    /// Short-lived URL from which the file's content can be downloaded.
    async fn download_link(&self, file_id: i64) -> Result<String>;
}

/// Directed relationships between platform resources.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Create relationships. A duplicate external id is an HTTP 409 error.
    async fn create(&self, relationships: &[Relationship]) -> Result<Vec<Relationship>>;

    /// Retrieve relationships by external id. Unknown ids are skipped.
    async fn retrieve(&self, external_ids: &[String]) -> Result<Vec<Relationship>>;

    /// Relationships whose source is `resource`.
    async fn list_from(&self, resource: &ResourceRef) -> Result<Vec<Relationship>>;
}

/// Asset hierarchy, read-only.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Total number of assets in the project.
    async fn count(&self) -> Result<u64>;

    /// One page of assets starting at `cursor`.
    async fn list_page(&self, cursor: Option<&str>, limit: u32) -> Result<Page<Asset>>;
}

/// Downloads job artifacts from signed URLs.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
