//! Collaborator traits for the backing store.
//!
//! The core never talks to a store directly; the embedding application hands
//! in a [`Loader`] and a [`Flusher`] (often the same type) and the state
//! machines call them at well-defined points.

use crate::error::{FlushError, LoadError};
use async_trait::async_trait;

/// Reads a document's initial contents.
///
/// Called once per entry into the lifecycle's `LOADING` phase. A failure is
/// not fatal: the lifecycle records the message and retries after a fixed
/// delay, without limit.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use docsync_core::error::LoadError;
/// use docsync_core::store::Loader;
///
/// struct Greeting;
///
/// #[async_trait]
/// impl Loader<String> for Greeting {
///     async fn load(&self, href: &str) -> Result<String, LoadError> {
///         Ok(format!("hello from {href}"))
///     }
/// }
/// ```
#[async_trait]
pub trait Loader<T>: Send + Sync {
    async fn load(&self, href: &str) -> Result<T, LoadError>;
}

/// Durably persists one content snapshot.
///
/// Implementations must be idempotent: a failed flush is retried with the
/// exact same snapshot, and a flush that completes after newer content
/// arrived must not clobber state the next flush depends on.
#[async_trait]
pub trait Flusher<T>: Send + Sync {
    async fn flush(&self, href: &str, contents: T) -> Result<(), FlushError>;
}
