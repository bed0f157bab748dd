//! Persistence backends for Taskwright.
//!
//! - [`InMemoryStore`] and [`JsonFileStore`] implement the core `StateStore`.
//! - [`ArtifactStore`] holds per-project artifacts, exposed to agents through
//!   [`ArtifactTool`].

pub mod artifacts;
pub mod file_backend;
pub mod in_memory;

pub use artifacts::{ArtifactStore, ArtifactTool};
pub use file_backend::JsonFileStore;
pub use in_memory::InMemoryStore;
