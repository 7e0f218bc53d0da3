//! # discovery-client
//!
//! HTTP clients for the platform APIs used by Discovery contextualization
//! jobs.
//!
//! This crate provides:
//! - [`PlatformClient`], implementing every collaborator trait from
//!   `discovery_core` against the REST API
//! - TOML and environment configuration ([`DiscoveryConfig`])
//! - Error classification for retry decisions ([`is_retryable`])
//! - An in-memory [`mock::MockPlatform`] (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Export the in-memory platform fake for use in other crates' tests
//!
//! # Example
//!
//! ```rust,no_run
//! use discovery_client::{DiscoveryConfig, PlatformClient};
//! use discovery_core::FileStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DiscoveryConfig::load().unwrap();
//!     let client = PlatformClient::new(config.api).unwrap();
//!     let url = client.download_link(42).await.unwrap();
//! }
//! ```

pub mod assets;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod jobs;
pub mod relationships;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{
    ApiConfig, ConfigError, ConfigResult, DiscoveryConfig, PollConfig, PostProcessingConfig,
};
pub use error::{is_retryable, ApiErrorCode};
pub use http::PlatformClient;
