//! File-system backing store.
//!
//! Each `href` is a path relative to the store's root directory. Loads read
//! the whole file as UTF-8; flushes write a sibling temp file and rename it
//! over the target, so a crash mid-flush never leaves a torn document and
//! flushing the same snapshot twice yields the same file.
//!
//! # Security
//!
//! - Hrefs that are absolute or contain `..` are rejected
//! - File size limit: 10MB

use async_trait::async_trait;
use docsync_core::{FlushError, Flusher, LoadError, Loader};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum document size in bytes (10MB).
const MAX_FILE_SIZE: u64 = 10_000_000;

/// Documents above this size are loaded but logged (1MB).
const LARGE_FILE_THRESHOLD: u64 = 1_000_000;

/// Store that maps hrefs onto files under a root directory.
///
/// # Examples
///
/// ```no_run
/// use docsync::FileStore;
/// use docsync_core::{Flusher, Loader};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FileStore::new("/var/lib/notes").create_missing(true);
/// let contents = store.load("today.md").await?;
/// store.flush("today.md", format!("{contents}\n- buy milk")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    create_missing: bool,
    tmp_counter: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            create_missing: false,
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// When set, loading a file that does not exist yields empty contents
    /// instead of an error. The file is created by the first flush.
    #[must_use]
    pub fn create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `href` to a path under the root.
    ///
    /// Returns `None` for empty, absolute or parent-escaping hrefs.
    pub fn resolve(&self, href: &str) -> Option<PathBuf> {
        let relative = Path::new(href);
        let mut components = relative.components().peekable();
        components.peek()?;
        if !components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            return None;
        }
        Some(self.root.join(relative))
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
    }
}

#[async_trait]
impl Loader<String> for FileStore {
    async fn load(&self, href: &str) -> Result<String, LoadError> {
        let path = self
            .resolve(href)
            .ok_or_else(|| LoadError::new(format!("href escapes store root: {href}")))?;

        tracing::debug!("Loading document from disk: {:?}", path);

        match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                let size = metadata.len();
                if size > MAX_FILE_SIZE {
                    tracing::error!(
                        "Document exceeds maximum size: {} bytes (limit: {} bytes)",
                        size,
                        MAX_FILE_SIZE
                    );
                    return Err(LoadError::new(format!(
                        "file too large: {} bytes (max: {} bytes)",
                        size, MAX_FILE_SIZE
                    )));
                }
                if size > LARGE_FILE_THRESHOLD {
                    tracing::warn!("Document is large: {} bytes for {:?}", size, path);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.create_missing => {
                tracing::debug!("{:?} does not exist yet, starting empty", path);
                return Ok(String::new());
            }
            Err(e) => {
                match e.kind() {
                    std::io::ErrorKind::NotFound => tracing::debug!("File not found: {:?}", path),
                    std::io::ErrorKind::PermissionDenied => {
                        tracing::warn!("Permission denied: {:?}", path);
                    }
                    _ => tracing::error!("IO error reading metadata for {:?}: {}", path, e),
                }
                return Err(e.into());
            }
        }

        let content = tokio::fs::read_to_string(&path).await?;
        tracing::debug!("Loaded {:?} ({} bytes)", path, content.len());
        Ok(content)
    }
}

#[async_trait]
impl Flusher<String> for FileStore {
    async fn flush(&self, href: &str, contents: String) -> Result<(), FlushError> {
        let path = self
            .resolve(href)
            .ok_or_else(|| FlushError::new(format!("href escapes store root: {href}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path(&path);
        if let Err(e) = tokio::fs::write(&tmp, contents.as_bytes()).await {
            tracing::warn!("Failed to write {:?}: {}", tmp, e);
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tracing::warn!("Failed to move {:?} into place: {}", tmp, e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!("Flushed {:?} ({} bytes)", path, contents.len());
        Ok(())
    }
}
