//! Document lifecycle manager.
//!
//! Loads a document, retries failed loads, routes edits to an owned write
//! coalescer while running, and drains that coalescer before stopping.

mod actor;
mod phase;

pub use actor::{DocumentHandle, DocumentLifecycle};
pub use phase::{DocumentSnapshot, LifecyclePhase};
