//! Object storage
//!
//! This module contains:
//! - [`ObjectStore`] trait - container/name object storage with properties
//! - [`InMemoryObjectStore`] - in-memory backend for tests
//! - [`FsObjectStore`] - filesystem backend
//! - [`OutcomeWriter`] / [`StepArtifact`] - step output contract

mod fs;
mod memory;
mod outcome;
mod store;

pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;
pub use outcome::{slug, OutcomeWriter, StepArtifact};
pub use store::*;
