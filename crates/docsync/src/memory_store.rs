//! In-memory backing store with failure injection.
//!
//! Used by tests and by the CLI's `--simulate-failures` mode to exercise the
//! retry paths of both state machines without touching a real store.

use async_trait::async_trait;
use dashmap::DashMap;
use docsync_core::{FlushError, Flusher, LoadError, Loader};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One recorded flush call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRecord<T> {
    pub href: String,
    pub contents: T,
    pub succeeded: bool,
}

/// Store backed by a `DashMap`.
///
/// Failures are scripted per operation kind and consumed in order, one per
/// call, across all hrefs.
///
/// # Examples
///
/// ```
/// use docsync::MemoryStore;
/// use docsync_core::{Flusher, Loader};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert("a.md", "draft".to_string());
/// store.fail_next_flushes(1, "disk full");
///
/// assert!(store.flush("a.md", "final".to_string()).await.is_err());
/// assert!(store.flush("a.md", "final".to_string()).await.is_ok());
/// assert_eq!(store.get("a.md").as_deref(), Some("final"));
/// assert_eq!(store.load("a.md").await.unwrap(), "final");
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore<T> {
    documents: DashMap<String, T>,
    flush_log: Mutex<Vec<FlushRecord<T>>>,
    load_failures: Mutex<VecDeque<String>>,
    flush_failures: Mutex<VecDeque<String>>,
    flush_latency: Option<Duration>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            documents: DashMap::new(),
            flush_log: Mutex::new(Vec::new()),
            load_failures: Mutex::new(VecDeque::new()),
            flush_failures: Mutex::new(VecDeque::new()),
            flush_latency: None,
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every flush by `latency` before it resolves.
    #[must_use]
    pub fn with_flush_latency(mut self, latency: Duration) -> Self {
        self.flush_latency = Some(latency);
        self
    }

    pub fn insert(&self, href: impl Into<String>, contents: T) {
        self.documents.insert(href.into(), contents);
    }

    pub fn get(&self, href: &str) -> Option<T> {
        self.documents.get(href).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Makes the next `count` loads fail with `message`.
    pub fn fail_next_loads(&self, count: usize, message: &str) {
        let mut failures = lock(&self.load_failures);
        failures.extend(std::iter::repeat_n(message.to_string(), count));
    }

    /// Makes the next `count` flushes fail with `message`.
    pub fn fail_next_flushes(&self, count: usize, message: &str) {
        let mut failures = lock(&self.flush_failures);
        failures.extend(std::iter::repeat_n(message.to_string(), count));
    }

    /// Every flush call so far, in call order.
    pub fn flush_log(&self) -> Vec<FlushRecord<T>> {
        lock(&self.flush_log).clone()
    }

    /// Contents of successful flushes for `href`, in order.
    pub fn flushed(&self, href: &str) -> Vec<T> {
        lock(&self.flush_log)
            .iter()
            .filter(|record| record.succeeded && record.href == href)
            .map(|record| record.contents.clone())
            .collect()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl<T> Loader<T> for MemoryStore<T>
where
    T: Clone + Default + Send + Sync,
{
    async fn load(&self, href: &str) -> Result<T, LoadError> {
        let failure = lock(&self.load_failures).pop_front();
        if let Some(message) = failure {
            tracing::debug!("Injected load failure for {}: {}", href, message);
            return Err(LoadError::new(message));
        }
        Ok(self.get(href).unwrap_or_default())
    }
}

#[async_trait]
impl<T> Flusher<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn flush(&self, href: &str, contents: T) -> Result<(), FlushError> {
        if let Some(latency) = self.flush_latency {
            tokio::time::sleep(latency).await;
        }

        let failure = lock(&self.flush_failures).pop_front();
        lock(&self.flush_log).push(FlushRecord {
            href: href.to_string(),
            contents: contents.clone(),
            succeeded: failure.is_none(),
        });

        match failure {
            Some(message) => {
                tracing::debug!("Injected flush failure for {}: {}", href, message);
                Err(FlushError::new(message))
            }
            None => {
                self.documents.insert(href.to_string(), contents);
                Ok(())
            }
        }
    }
}
