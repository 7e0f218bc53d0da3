//! Turns a completed job's artifact into a stored, linked file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use discovery_client::{is_retryable, PostProcessingConfig};
use discovery_core::{
    defaults, ArtifactFetcher, DerivedArtifact, Error, FileMetadata, FileStore, Relationship,
    RelationshipStore, Result, SourceFile, StoredFile,
};

/// Download, upload, and link steps run after a job completes.
///
/// Each step is a separate fallible operation. Nothing is rolled back: when
/// linking fails after the upload succeeded, the error names the orphaned
/// file so it can be linked or removed by hand.
#[derive(Clone)]
pub struct ArtifactPostProcessor {
    files: Arc<dyn FileStore>,
    relationships: Arc<dyn RelationshipStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    link_attempts: u32,
    link_retry_delay: Duration,
}

impl ArtifactPostProcessor {
    pub fn new(
        files: Arc<dyn FileStore>,
        relationships: Arc<dyn RelationshipStore>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            files,
            relationships,
            fetcher,
            link_attempts: defaults::LINK_ATTEMPTS,
            link_retry_delay: Duration::from_millis(defaults::LINK_RETRY_DELAY_MS),
        }
    }

    /// Set how many times a link request is attempted and the delay
    /// between attempts.
    pub fn with_link_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.link_attempts = attempts.max(1);
        self.link_retry_delay = delay;
        self
    }

    pub fn with_config(self, config: &PostProcessingConfig) -> Self {
        self.with_link_retry(
            config.link_attempts,
            Duration::from_millis(config.link_retry_delay_ms),
        )
    }

    /// Fetch a job artifact from its signed URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| Error::PostProcessing(format!("Failed to download {}: {}", url, e)))?;
        debug!(bytes = bytes.len(), "Artifact downloaded");
        Ok(bytes)
    }

    /// Create a file record and upload `bytes` into it.
    pub async fn upload(&self, bytes: &[u8], metadata: &FileMetadata) -> Result<StoredFile> {
        let mut file = self.files.create_file(metadata).await.map_err(|e| {
            Error::PostProcessing(format!("Failed to create file {}: {}", metadata.name, e))
        })?;
        self.files.upload_content(&file, bytes).await.map_err(|e| {
            Error::PostProcessing(format!(
                "Failed to upload content of file {}: {}",
                file.id, e
            ))
        })?;
        file.uploaded = true;
        info!(file_id = file.id, name = %file.name, bytes = bytes.len(), "Derived file uploaded");
        Ok(file)
    }

    /// Link a derived file to the file it was produced from.
    pub async fn link(&self, new_file_id: i64, source_file_id: i64) -> Result<Relationship> {
        let link = Relationship::derived_from(new_file_id, source_file_id);
        let external_id = link.external_id.clone();
        self.ensure_links(vec![link])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("Relationship {} was not stored", external_id)))
    }

    /// Link a derived file to every asset detected in it.
    pub async fn link_assets(&self, new_file_id: i64, asset_ids: &[i64]) -> Result<Vec<Relationship>> {
        let mut seen = HashSet::new();
        let links: Vec<_> = asset_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| Relationship::detected_asset(new_file_id, *id))
            .collect();
        if links.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_links(links).await
    }

    /// Download the artifact at `url`, store it as the derived SVG of
    /// `source`, and link it to the source and the detected assets.
    pub async fn process(
        &self,
        url: &str,
        source: &SourceFile,
        asset_ids: &[i64],
    ) -> Result<DerivedArtifact> {
        let bytes = self.download(url).await?;

        let metadata = FileMetadata {
            name: source.derived_svg_name(),
            mime_type: Some(defaults::SVG_MIME_TYPE.to_string()),
            source: Some(defaults::DERIVED_FILE_SOURCE.to_string()),
            external_id: None,
            asset_ids: asset_ids.to_vec(),
            metadata: HashMap::from([("sourceFileId".to_string(), source.id.to_string())]),
        };
        let file = self.upload(&bytes, &metadata).await?;

        let orphaned = |e: Error| {
            Error::PostProcessing(format!(
                "File {} was uploaded but could not be linked to file {}: {}",
                file.id, source.id, e
            ))
        };
        let source_link = self.link(file.id, source.id).await.map_err(orphaned)?;
        let asset_links = self
            .link_assets(file.id, asset_ids)
            .await
            .map_err(orphaned)?;

        Ok(DerivedArtifact {
            file,
            source_link,
            asset_links,
        })
    }

    /// Create `links`, treating already-existing external ids as success.
    /// The result is in the order of `links`.
    async fn ensure_links(&self, links: Vec<Relationship>) -> Result<Vec<Relationship>> {
        match self.create_links(&links).await {
            Err(e) if e.is_conflict() => {
                debug!(count = links.len(), "Relationship already exists, resolving");
                self.resolve_existing(links).await
            }
            result => result,
        }
    }

    /// One create call, attempted up to `link_attempts` times while the
    /// failure is retryable.
    async fn create_links(&self, links: &[Relationship]) -> Result<Vec<Relationship>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.relationships.create(links).await {
                Ok(created) => {
                    debug!(count = created.len(), attempt, "Relationships created");
                    return Ok(created);
                }
                Err(e) if attempt < self.link_attempts && is_retryable(&e) => {
                    warn!(attempt, error = %e, "Relationship creation failed, retrying");
                    sleep(self.link_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// After a conflict: keep the records that exist and create the rest.
    async fn resolve_existing(&self, links: Vec<Relationship>) -> Result<Vec<Relationship>> {
        let ids: Vec<String> = links.iter().map(|l| l.external_id.clone()).collect();
        let existing: HashMap<String, Relationship> = self
            .relationships
            .retrieve(&ids)
            .await?
            .into_iter()
            .map(|r| (r.external_id.clone(), r))
            .collect();

        let missing: Vec<Relationship> = links
            .iter()
            .filter(|l| !existing.contains_key(&l.external_id))
            .cloned()
            .collect();
        let mut created: HashMap<String, Relationship> = HashMap::new();
        if !missing.is_empty() {
            for r in self.create_links(&missing).await? {
                created.insert(r.external_id.clone(), r);
            }
        }

        links
            .into_iter()
            .map(|link| {
                existing
                    .get(&link.external_id)
                    .or_else(|| created.get(&link.external_id))
                    .cloned()
                    .ok_or_else(|| {
                        Error::NotFound(format!("Relationship {} was not stored", link.external_id))
                    })
            })
            .collect()
    }
}
