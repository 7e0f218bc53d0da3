//! # discovery-jobs
//!
//! Asynchronous contextualization flows for Discovery.
//!
//! This crate provides:
//! - A submit-then-poll [`JobPoller`] with capped backoff and a hard timeout
//! - The [`ArtifactPostProcessor`] that stores a job's artifact and links it
//!   to its source
//! - [`ContextualizationService`], which runs whole flows as cancellable
//!   tasks and publishes their events
//!
//! ## Example
//!
//! ```ignore
//! use discovery_client::{DiscoveryConfig, PlatformClient};
//! use discovery_jobs::{Callbacks, ContextualizationService};
//! use discovery_core::SourceFile;
//!
//! let config = DiscoveryConfig::load()?;
//! let client = PlatformClient::new(config.api.clone())?;
//! let service = ContextualizationService::from_client(client, &config);
//!
//! let handle = service.start_pnid_conversion(
//!     SourceFile::new(42, "diagram.pdf"),
//!     Callbacks::new()
//!         .on_progress(|p| println!("{}", p))
//!         .on_result(|artifact| println!("Created file {}", artifact.file.id))
//!         .on_error(|e| eprintln!("{}", e)),
//! );
//!
//! // Abort from elsewhere; no callback runs afterwards
//! handle.cancel();
//! ```

pub mod flow;
pub mod poller;
pub mod postprocess;
pub mod service;

pub use flow::{
    Callbacks, FlowContext, FlowHandle, FlowOutcome, FlowOutput, FlowRunner, JobState,
    ProgressCallback,
};
pub use poller::{JobPoller, PollPolicy};
pub use postprocess::ArtifactPostProcessor;
pub use service::ContextualizationService;
