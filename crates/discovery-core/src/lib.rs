//! # discovery-core
//!
//! Core types, traits, and abstractions for Discovery contextualization jobs.
//!
//! This crate provides the foundational data structures (jobs, files,
//! relationships, progress reports) and the collaborator traits that the
//! client and job crates implement and consume.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, FlowEvent};
pub use models::*;
pub use traits::*;
