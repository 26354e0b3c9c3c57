//! Backing stores, a document registry and the `docsync` CLI built on
//! [`docsync_core`].

pub mod cli;
pub mod file_store;
pub mod memory_store;
pub mod registry;

// Re-export commonly used types
pub use file_store::FileStore;
pub use memory_store::{FlushRecord, MemoryStore};
pub use registry::DocumentRegistry;
