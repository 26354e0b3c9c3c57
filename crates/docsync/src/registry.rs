//! Table of open documents.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use docsync_core::{
    DocumentHandle, DocumentLifecycle, Flusher, Loader, Result, SyncConfig, WriteGuard,
};
use std::sync::Arc;

/// Open documents keyed by `href`.
///
/// Every document gets its own lifecycle task; the registry only holds the
/// handles. All documents share one loader, one flusher and one guard.
///
/// # Examples
///
/// ```
/// use docsync::{DocumentRegistry, MemoryStore};
/// use docsync_core::{AcceptAll, LifecyclePhase, SyncConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> docsync_core::Result<()> {
/// let store = Arc::new(MemoryStore::<String>::new());
/// let registry = DocumentRegistry::<String>::new(
///     SyncConfig::default(),
///     store.clone(),
///     store.clone(),
///     Arc::new(AcceptAll),
/// );
///
/// let doc = registry.open("a.md")?;
/// doc.wait_for_phase(|phase| phase == LifecyclePhase::Running).await?;
/// assert_eq!(registry.len(), 1);
///
/// registry.close_all().await;
/// assert!(registry.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct DocumentRegistry<T> {
    documents: DashMap<String, DocumentHandle<T>>,
    config: SyncConfig,
    loader: Arc<dyn Loader<T>>,
    flusher: Arc<dyn Flusher<T>>,
    guard: Arc<dyn WriteGuard<T>>,
}

impl<T> DocumentRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        config: SyncConfig,
        loader: Arc<dyn Loader<T>>,
        flusher: Arc<dyn Flusher<T>>,
        guard: Arc<dyn WriteGuard<T>>,
    ) -> Self {
        Self {
            documents: DashMap::new(),
            config,
            loader,
            flusher,
            guard,
        }
    }

    /// Returns the handle for `href`, spawning and loading the document if
    /// it is not open yet.
    ///
    /// A document that stopped on its own is replaced by a fresh one.
    pub fn open(&self, href: &str) -> Result<DocumentHandle<T>> {
        match self.documents.entry(href.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_stopped() => Ok(entry.get().clone()),
            Entry::Occupied(mut entry) => {
                tracing::debug!("Reopening stopped document {}", href);
                let handle = self.spawn(href)?;
                entry.insert(handle.clone());
                Ok(handle)
            }
            Entry::Vacant(entry) => {
                tracing::debug!("Opening document {}", href);
                let handle = self.spawn(href)?;
                entry.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    pub fn get(&self, href: &str) -> Option<DocumentHandle<T>> {
        self.documents.get(href).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Closes `href`, waiting for its pending writes to be flushed.
    ///
    /// Returns `false` if the document was not open.
    pub async fn close(&self, href: &str) -> Result<bool> {
        let Some((_, handle)) = self.documents.remove(href) else {
            return Ok(false);
        };
        handle.close().await?;
        Ok(true)
    }

    /// Closes every open document concurrently.
    pub async fn close_all(&self) {
        let handles: Vec<_> = self
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.documents.clear();

        tracing::info!("Closing {} document(s)", handles.len());
        let results = futures::future::join_all(handles.iter().map(|handle| handle.close())).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!("Failed to close {}: {}", handle.href(), e);
            }
        }
    }

    fn spawn(&self, href: &str) -> Result<DocumentHandle<T>> {
        let handle = DocumentLifecycle::spawn(
            href,
            &self.config,
            Arc::clone(&self.loader),
            Arc::clone(&self.flusher),
            Arc::clone(&self.guard),
        );
        handle.load()?;
        Ok(handle)
    }
}
