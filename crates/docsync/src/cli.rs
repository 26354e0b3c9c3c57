//! Command-line front end.
//!
//! Opens one document, appends every stdin line to it and persists the
//! result through the coalescer. EOF closes the document, which drains any
//! outstanding flush before the process exits.

use crate::{DocumentRegistry, FileStore, MemoryStore};
use clap::Parser;
use docsync_core::{Flusher, LifecyclePhase, Loader, SkipUnchanged, SyncConfig, SyncError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(about = "Append stdin lines to a document with debounced, retrying writes")]
#[command(version)]
pub struct Cli {
    /// Document to edit. Created on first flush if it does not exist.
    pub path: PathBuf,

    /// Back the document with an in-memory store that fails the first load
    /// and the first two flushes, then write the result to `path`.
    #[arg(long)]
    pub simulate_failures: bool,

    /// JSON configuration file.
    #[arg(long, env = "DOCSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

pub async fn run(cli: Cli) -> docsync_core::Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::from_path(path).await?,
        None => SyncConfig::default(),
    };
    tracing::debug!("Using config: {:?}", config);

    let (root, href) = split_path(&cli.path)?;
    let files = Arc::new(FileStore::new(root).create_missing(true));

    if cli.simulate_failures {
        let memory = Arc::new(MemoryStore::<String>::new());
        let initial = files.load(&href).await.map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        memory.insert(href.clone(), initial);
        memory.fail_next_loads(1, "simulated load failure");
        memory.fail_next_flushes(2, "simulated flush failure");

        edit(&config, Arc::clone(&memory), &href).await?;

        for record in memory.flush_log() {
            let line = serde_json::json!({
                "href": record.href,
                "bytes": record.contents.len(),
                "succeeded": record.succeeded,
            });
            println!("{line}");
        }
        if let Some(contents) = memory.get(&href) {
            files
                .flush(&href, contents)
                .await
                .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        }
    } else {
        edit(&config, files, &href).await?;
    }

    Ok(())
}

async fn edit<S>(config: &SyncConfig, store: Arc<S>, href: &str) -> docsync_core::Result<()>
where
    S: Loader<String> + Flusher<String> + 'static,
{
    let registry = DocumentRegistry::new(
        config.clone(),
        Arc::clone(&store) as Arc<dyn Loader<String>>,
        store as Arc<dyn Flusher<String>>,
        Arc::new(SkipUnchanged),
    );

    let doc = registry.open(href)?;
    let snapshot = doc
        .wait_for_phase(|phase| phase == LifecyclePhase::Running || phase.is_terminal())
        .await?;
    let mut contents = snapshot.contents.unwrap_or_default();
    tracing::info!("Editing {} ({} bytes)", href, contents.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        contents.push_str(&line);
        contents.push('\n');
        doc.write(contents.clone())?;
    }

    registry.close_all().await;
    let snapshot = doc.snapshot();
    if let Some(error) = snapshot.error {
        tracing::warn!("{} stopped with error: {}", href, error);
    }
    Ok(())
}

/// Splits a document path into the store root and the href below it.
fn split_path(path: &Path) -> docsync_core::Result<(PathBuf, String)> {
    let href = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::InvalidConfig(format!("not a file path: {}", path.display())))?;
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((root, href))
}
