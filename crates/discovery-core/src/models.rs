//! Data models for contextualization jobs, files, and relationships.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{Error, Result};

// =============================================================================
// JOBS
// =============================================================================

/// Identifier of a remote job. The platform returns either a number or a
/// string depending on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Number(i64),
    Text(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Number(n) => write!(f, "{}", n),
            JobId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for JobId {
    fn from(n: i64) -> Self {
        JobId::Number(n)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId::Text(s.to_string())
    }
}

/// Remote job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", try_from = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "queued" => Ok(JobStatus::Pending),
            "running" | "inprogress" | "in_progress" => Ok(JobStatus::Running),
            "completed" | "done" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::Serialization(format!("Unknown job status: {}", s))),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// The contextualization services this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Detect asset tags in a P&ID document.
    PnidParse,
    /// Render a P&ID document with annotations into SVG.
    PnidConvert,
    /// Match entity names in one or more files.
    EntityExtraction,
}

impl JobKind {
    /// Path (relative to the project root) that starts a job.
    pub fn submit_path(&self) -> &'static str {
        match self {
            JobKind::PnidParse => "/context/pnid/parse",
            JobKind::PnidConvert => "/context/pnid/convert",
            JobKind::EntityExtraction => "/context/entity_extraction/extract",
        }
    }

    /// Path (relative to the project root) that reports a job's status.
    pub fn status_path(&self, job_id: &JobId) -> String {
        match self {
            JobKind::PnidParse => format!("/context/pnid/parse/{}", job_id),
            JobKind::PnidConvert => format!("/context/pnid/convert/{}", job_id),
            JobKind::EntityExtraction => format!("/context/entity_extraction/{}", job_id),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PnidParse => "pnid_parse",
            JobKind::PnidConvert => "pnid_convert",
            JobKind::EntityExtraction => "entity_extraction",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for P&ID tag detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnidOptions {
    /// Allow matches on a subset of an entity's tokens.
    pub partial_match: bool,
    /// Minimum tokens a partial match must cover.
    pub min_tokens: u32,
    /// Render the converted diagram in grayscale.
    pub grayscale: bool,
}

impl Default for PnidOptions {
    fn default() -> Self {
        Self {
            partial_match: true,
            min_tokens: 1,
            grayscale: true,
        }
    }
}

/// A job submission: which service, and the JSON body to send.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub body: JsonValue,
}

impl JobRequest {
    /// Detect references to `entities` in the P&ID stored as `file_id`.
    pub fn pnid_parse(file_id: i64, entities: &[Asset], options: &PnidOptions) -> Self {
        let entities: Vec<JsonValue> = entities
            .iter()
            .map(|a| json!({ "name": a.name, "id": a.id }))
            .collect();
        Self {
            kind: JobKind::PnidParse,
            body: json!({
                "fileId": file_id,
                "entities": entities,
                "searchField": "name",
                "partialMatch": options.partial_match,
                "minTokens": options.min_tokens,
            }),
        }
    }

    /// Convert `file_id` into an annotated SVG using parse results.
    pub fn pnid_convert(file_id: i64, annotations: JsonValue, options: &PnidOptions) -> Self {
        Self {
            kind: JobKind::PnidConvert,
            body: json!({
                "fileId": file_id,
                "items": annotations,
                "grayscale": options.grayscale,
            }),
        }
    }

    /// Find mentions of `entities` across `file_ids`.
    pub fn entity_extraction(file_ids: &[i64], entities: &[Asset]) -> Self {
        let names: Vec<&str> = entities.iter().map(|a| a.name.as_str()).collect();
        Self {
            kind: JobKind::EntityExtraction,
            body: json!({
                "fileIds": file_ids,
                "entities": names,
            }),
        }
    }
}

/// One observation of a remote job's state.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Full response body; result fields live alongside `status`.
    pub result: JsonValue,
    pub error_message: Option<String>,
}

impl JobSnapshot {
    /// Build a snapshot from a status response body.
    pub fn from_body(job_id: JobId, body: JsonValue) -> Result<Self> {
        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Serialization("Job status response has no status".into()))?
            .parse::<JobStatus>()?;
        let error_message = body
            .get("errorMessage")
            .or_else(|| body.get("error"))
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(Self {
            job_id,
            status,
            result: body,
            error_message,
        })
    }

    /// String-valued result field, looked up at the top level first and then
    /// in the first element of `items`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.result
            .get(key)
            .and_then(|v| v.as_str())
            .or_else(|| {
                self.items()
                    .first()
                    .and_then(|item| item.get(key))
                    .and_then(|v| v.as_str())
            })
    }

    /// URL of the converted SVG produced by a P&ID convert job.
    pub fn svg_url(&self) -> Option<&str> {
        self.str_field("svgUrl")
    }

    /// The `items` array of the result, or an empty slice.
    pub fn items(&self) -> &[JsonValue] {
        self.result
            .get("items")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Progress surfaced to the initiator of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressReport {
    /// A named phase such as "Processing File".
    Phase { label: String },
    /// A phase with a percentage computed from a known total.
    Percent { label: String, percent: u8 },
}

impl ProgressReport {
    pub fn phase(label: impl Into<String>) -> Self {
        ProgressReport::Phase {
            label: label.into(),
        }
    }

    /// Percentage of `done` out of `total`, clamped to 100. An empty total
    /// counts as finished.
    pub fn fraction(label: impl Into<String>, done: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        ProgressReport::Percent {
            label: label.into(),
            percent,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ProgressReport::Phase { label } | ProgressReport::Percent { label, .. } => label,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressReport::Phase { label } => f.write_str(label),
            ProgressReport::Percent { label, percent } => write!(f, "{} ({}%)", label, percent),
        }
    }
}

// =============================================================================
// RESOURCES & RELATIONSHIPS
// =============================================================================

/// Resource types a relationship can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Asset,
    File,
    Event,
    TimeSeries,
    ThreeD,
}

/// One end of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource: ResourceType,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn file(id: i64) -> Self {
        Self {
            resource: ResourceType::File,
            resource_id: id.to_string(),
        }
    }

    pub fn asset(id: i64) -> Self {
        Self {
            resource: ResourceType::Asset,
            resource_id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipType {
    BelongsTo,
    FlowsTo,
    IsParentOf,
    Implements,
}

/// A typed directed edge between two platform resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub external_id: String,
    pub source: ResourceRef,
    pub target: ResourceRef,
    pub relationship_type: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// External id linking a derived file back to its source file.
///
/// Deterministic in both ids so repeating the link never creates a second
/// record.
pub fn source_link_external_id(source_id: i64, derived_id: i64) -> String {
    format!("{}-manual-pnid-{}", source_id, derived_id)
}

/// External id linking a derived file to an asset detected in it.
pub fn asset_link_external_id(derived_id: i64, asset_id: i64) -> String {
    format!("{}-pnid-asset-{}", derived_id, asset_id)
}

impl Relationship {
    /// `derived` belongs to `source`.
    pub fn derived_from(derived_id: i64, source_id: i64) -> Self {
        Self {
            external_id: source_link_external_id(source_id, derived_id),
            source: ResourceRef::file(derived_id),
            target: ResourceRef::file(source_id),
            relationship_type: RelationshipType::BelongsTo,
            confidence: Some(1.0),
        }
    }

    /// `derived` file belongs to `asset`.
    pub fn detected_asset(derived_id: i64, asset_id: i64) -> Self {
        Self {
            external_id: asset_link_external_id(derived_id, asset_id),
            source: ResourceRef::file(derived_id),
            target: ResourceRef::asset(asset_id),
            relationship_type: RelationshipType::BelongsTo,
            confidence: None,
        }
    }
}

// =============================================================================
// FILES & ASSETS
// =============================================================================

/// Metadata for a new stored file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A file record in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub uploaded: bool,
    /// Present only on the response to file creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

/// The file a contextualization flow starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: i64,
    pub name: String,
}

impl SourceFile {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Name of the SVG produced by converting this file.
    pub fn derived_svg_name(&self) -> String {
        let stem = self
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.name);
        format!("{}{}.svg", crate::defaults::DERIVED_FILE_PREFIX, stem)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One page of a cursor-paged listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// A mention of a known entity found by parsing or extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntity {
    pub text: String,
    #[serde(default)]
    pub asset_id: Option<i64>,
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

impl ExtractedEntity {
    /// Entities listed in a completed job's `items`. Items that do not
    /// describe an entity are skipped.
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Vec<Self> {
        snapshot
            .items()
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }
}

/// Output of the post-processing step: the new file and its links.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedArtifact {
    pub file: StoredFile,
    /// `belongsTo` link from the derived file to its source.
    pub source_link: Relationship,
    /// Links from the derived file to assets detected in it.
    pub asset_links: Vec<Relationship>,
}
