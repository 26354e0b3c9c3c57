//! Core state machines for docsync.
//!
//! This crate keeps an editor's in-memory document and its backing store in
//! sync without blocking the editor on I/O.
//!
//! # Architecture
//!
//! docsync-core defines:
//! - **Write coalescer**: debounces writes, keeps only the newest value and
//!   retries failed flushes until one succeeds
//! - **Document lifecycle**: loads a document with retry, owns its coalescer
//!   while running and drains it on exit
//! - **Store traits**: `Loader` and `Flusher`, supplied by the embedding
//!   application
//! - **Guards**: predicates that decide whether a write is worth keeping
//!
//! Both machines run as tokio tasks and publish their state through
//! `tokio::sync::watch` cells, so callers can observe every transition.
//!
//! # Examples
//!
//! ```no_run
//! use async_trait::async_trait;
//! use docsync_core::{
//!     AcceptAll, DocumentLifecycle, FlushError, Flusher, LifecyclePhase, LoadError, Loader,
//!     SyncConfig,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Loader<String> for Echo {
//!     async fn load(&self, href: &str) -> Result<String, LoadError> {
//!         Ok(format!("# {href}"))
//!     }
//! }
//!
//! #[async_trait]
//! impl Flusher<String> for Echo {
//!     async fn flush(&self, href: &str, contents: String) -> Result<(), FlushError> {
//!         println!("{href}: {contents}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> docsync_core::Result<()> {
//! let store = Arc::new(Echo);
//! let doc = DocumentLifecycle::<String>::spawn(
//!     "notes.md",
//!     &SyncConfig::default(),
//!     store.clone(),
//!     store,
//!     Arc::new(AcceptAll),
//! );
//!
//! doc.load()?;
//! doc.wait_for_phase(|phase| phase == LifecyclePhase::Running || phase.is_terminal())
//!     .await?;
//! doc.write("# notes.md\n\nfirst line".to_string())?;
//! doc.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod coalescer;
pub mod config;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod store;
mod wait;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use coalescer::{Coalescer, CoalescerHandle, CoalescerSnapshot, FlushState, Phase};
pub use config::{CoalescerConfig, LifecycleConfig, SyncConfig};
pub use error::{FlushError, LoadError, Result, SyncError};
pub use guard::{AcceptAll, SkipUnchanged, WriteGuard};
pub use lifecycle::{DocumentHandle, DocumentLifecycle, DocumentSnapshot, LifecyclePhase};
pub use store::{Flusher, Loader};
