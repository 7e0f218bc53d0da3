//! Centralized default constants for Discovery.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// PLATFORM API
// =============================================================================

/// Default platform API base URL.
pub const BASE_URL: &str = "https://api.cognitedata.com";

/// Default per-request HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Page size when listing assets for the reference entity list.
pub const ASSET_PAGE_LIMIT: u32 = 1000;

/// Chunk size for resumable uploads. Multiple of 256 KiB, as resumable
/// upload sessions require.
pub const UPLOAD_CHUNK_BYTES: usize = 8 * 1024 * 1024;

// =============================================================================
// POLLING
// =============================================================================

/// First delay between status polls. Matches the fixed one-second
/// interval the web client used.
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Upper bound on the delay between status polls.
pub const POLL_MAX_INTERVAL_MS: u64 = 10_000;

/// Growth factor applied to the poll delay after every non-terminal status.
pub const POLL_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Largest growth factor a poll configuration may ask for.
pub const POLL_MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Maximum wall-clock time spent waiting on a single remote job.
pub const POLL_TIMEOUT_SECS: u64 = 15 * 60;

// =============================================================================
// POST-PROCESSING
// =============================================================================

/// Attempts made to create a relationship before giving up.
pub const LINK_ATTEMPTS: u32 = 3;

/// Delay between relationship creation attempts.
pub const LINK_RETRY_DELAY_MS: u64 = 500;

/// Name prefix for files produced by P&ID conversion.
pub const DERIVED_FILE_PREFIX: &str = "Processed-";

/// `source` recorded on derived files.
pub const DERIVED_FILE_SOURCE: &str = "discovery";

/// MIME type of converted P&ID diagrams.
pub const SVG_MIME_TYPE: &str = "image/svg+xml";

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the flow event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_BASE_URL: &str = "DISCOVERY_BASE_URL";
pub const ENV_PROJECT: &str = "DISCOVERY_PROJECT";
pub const ENV_TOKEN: &str = "DISCOVERY_TOKEN";
pub const ENV_TIMEOUT: &str = "DISCOVERY_TIMEOUT";
pub const ENV_UPLOAD_CHUNK_BYTES: &str = "DISCOVERY_UPLOAD_CHUNK_BYTES";
pub const ENV_POLL_INTERVAL_MS: &str = "DISCOVERY_POLL_INTERVAL_MS";
pub const ENV_POLL_MAX_INTERVAL_MS: &str = "DISCOVERY_POLL_MAX_INTERVAL_MS";
pub const ENV_POLL_TIMEOUT_SECS: &str = "DISCOVERY_POLL_TIMEOUT_SECS";
pub const ENV_LINK_ATTEMPTS: &str = "DISCOVERY_LINK_ATTEMPTS";
