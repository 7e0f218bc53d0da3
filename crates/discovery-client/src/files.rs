//! File store endpoints and the upload session.

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use discovery_core::{Error, FileMetadata, FileStore, Result, StoredFile};

use crate::error::error_from_response;
use crate::http::PlatformClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadLinkItem {
    id: i64,
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadLinkResponse {
    items: Vec<DownloadLinkItem>,
}

/// `Content-Range` header for bytes `start..end` of `total`.
fn content_range(start: usize, end: usize, total: usize) -> String {
    format!("bytes {}-{}/{}", start, end - 1, total)
}

impl PlatformClient {
    /// PUT the whole body in one request.
    async fn upload_single(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<()> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    /// PUT the body as a resumable session, one `Content-Range` chunk at a
    /// time. Intermediate chunks are acknowledged with 308.
    async fn upload_chunked(
        &self,
        url: &str,
        content_type: &str,
        bytes: &[u8],
        chunk_size: usize,
    ) -> Result<()> {
        let total = bytes.len();
        let mut start = 0;
        while start < total {
            let end = (start + chunk_size).min(total);
            trace!(start, end, total, "Uploading chunk");
            let response = self
                .client
                .put(url)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, end - start)
                .header(CONTENT_RANGE, content_range(start, end, total))
                .body(bytes[start..end].to_vec())
                .send()
                .await?;

            let status = response.status();
            let last = end == total;
            let accepted = status.is_success() || (!last && status == StatusCode::PERMANENT_REDIRECT);
            if !accepted {
                return Err(error_from_response(response).await);
            }
            start = end;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for PlatformClient {
    async fn create_file(&self, metadata: &FileMetadata) -> Result<StoredFile> {
        debug!(name = %metadata.name, "Creating file record");
        self.send_json(self.post("/files").json(metadata)).await
    }

    async fn upload_content(&self, file: &StoredFile, bytes: &[u8]) -> Result<()> {
        let url = file.upload_url.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!("File {} has no upload URL", file.id))
        })?;
        let content_type = file
            .mime_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let chunk_size = self.config().upload_chunk_bytes;

        debug!(file_id = file.id, bytes = bytes.len(), "Uploading file content");
        if bytes.len() <= chunk_size {
            self.upload_single(url, content_type, bytes).await
        } else {
            self.upload_chunked(url, content_type, bytes, chunk_size)
                .await
        }
    }

    async fn download_link(&self, file_id: i64) -> Result<String> {
        let response: DownloadLinkResponse = self
            .send_json(
                self.post("/files/downloadlink")
                    .json(&json!({ "items": [{ "id": file_id }] })),
            )
            .await?;
        response
            .items
            .into_iter()
            .find(|item| item.id == file_id)
            .map(|item| item.download_url)
            .ok_or_else(|| Error::NotFound(format!("No download link for file {}", file_id)))
    }
}
