//! Common test utilities for integration tests.

use docsync::{DocumentRegistry, FlushRecord, MemoryStore};
use docsync_core::{
    AcceptAll, DocumentHandle, Flusher, LifecyclePhase, Loader, SyncConfig, WriteGuard,
};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

/// Config with short timers so tests stay fast.
#[allow(dead_code)] // Used by in-process tests, not the CLI tests
pub(crate) fn fast_config() -> SyncConfig {
    SyncConfig::from_json_str(
        r#"{ "coalescer": { "debounce_ms": 10 }, "lifecycle": { "retry_delay_ms": 50 } }"#,
    )
    .unwrap()
}

/// Registry backed by a single in-memory store.
#[allow(dead_code)] // Used by in-process tests, not the CLI tests
pub(crate) fn memory_registry(
    store: &Arc<MemoryStore<String>>,
    guard: Arc<dyn WriteGuard<String>>,
) -> DocumentRegistry<String> {
    DocumentRegistry::new(
        fast_config(),
        Arc::clone(store) as Arc<dyn Loader<String>>,
        Arc::clone(store) as Arc<dyn Flusher<String>>,
        guard,
    )
}

#[allow(dead_code)] // Used by in-process tests, not the CLI tests
pub(crate) fn accept_all() -> Arc<dyn WriteGuard<String>> {
    Arc::new(AcceptAll)
}

/// Opens `href` and waits until it is running.
#[allow(dead_code)] // Used by in-process tests, not the CLI tests
pub(crate) async fn open_running(
    registry: &DocumentRegistry<String>,
    href: &str,
) -> DocumentHandle<String> {
    let doc = registry.open(href).expect("open failed");
    doc.wait_for_phase(|phase| phase == LifecyclePhase::Running)
        .await
        .expect("document never reached RUNNING");
    doc
}

/// Waits until every write sent to `doc` so far has been flushed.
#[allow(dead_code)] // Used by in-process tests, not the CLI tests
pub(crate) async fn settle(doc: &DocumentHandle<String>) {
    let persister = doc.persister().expect("document has no persister");
    persister.settled_phase().await.expect("persister stopped");
    persister.drained().await.expect("persister stopped");
}

/// One line per flush call: href, outcome and contents.
#[allow(dead_code)] // Used by snapshot tests only
pub(crate) fn render_log(log: &[FlushRecord<String>]) -> String {
    log.iter()
        .map(|record| {
            format!(
                "{} {} {:?}",
                record.href,
                if record.succeeded { "ok" } else { "failed" },
                record.contents
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the docsync binary on `path`, feeding `input` on stdin.
///
/// Timers come from a config file written next to the document.
#[allow(dead_code)] // Used by the CLI tests only
pub(crate) fn run_cli(path: &Path, extra_args: &[&str], input: &str) -> Output {
    let config = path.with_extension("docsync.json");
    std::fs::write(
        &config,
        r#"{ "coalescer": { "debounce_ms": 10 }, "lifecycle": { "retry_delay_ms": 10 } }"#,
    )
    .expect("Failed to write config");

    let mut process = Command::new(env!("CARGO_BIN_EXE_docsync"))
        .args(extra_args)
        .arg(path)
        .env("DOCSYNC_CONFIG", &config)
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn docsync binary");

    let mut stdin = process.stdin.take().expect("stdin not captured");
    stdin.write_all(input.as_bytes()).expect("Failed to write stdin");
    drop(stdin);

    process.wait_with_output().expect("Failed to wait for docsync")
}
