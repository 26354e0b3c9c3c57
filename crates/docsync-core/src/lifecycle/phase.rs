use crate::coalescer::CoalescerHandle;
use std::fmt;

/// Phase of a document's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// Spawned, waiting for `LOAD`.
    PreLoad,
    /// A load is in flight.
    Loading,
    /// The last load failed; a retry is scheduled.
    WaitRetry,
    /// Loaded, edits are routed to the persister.
    Running,
    /// `EXIT` arrived with unflushed contents; waiting for the persister to drain.
    Cleanup,
    Stopped,
}

impl LifecyclePhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreLoad => "PRE_LOAD",
            Self::Loading => "LOADING",
            Self::WaitRetry => "WAIT_RETRY",
            Self::Running => "RUNNING",
            Self::Cleanup => "CLEANUP",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one document.
///
/// `contents` holds what was loaded, not what has been written since; the
/// persister's own snapshot carries the newest value.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot<T> {
    pub href: String,
    pub phase: LifecyclePhase,
    pub contents: Option<T>,
    pub error: Option<String>,
    pub persister: Option<CoalescerHandle<T>>,
}

impl<T> DocumentSnapshot<T> {
    pub(crate) fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            phase: LifecyclePhase::PreLoad,
            contents: None,
            error: None,
            persister: None,
        }
    }
}
