//! Write coalescer.
//!
//! Folds bursts of writes into as few flushes as possible while keeping the
//! newest value. The transition table lives in [`machine`]; [`actor`] runs it
//! on a tokio task with the debounce timer and the in-flight flush.

mod actor;
mod machine;

pub use actor::{Coalescer, CoalescerHandle};
pub use machine::{CoalescerMachine, CoalescerSnapshot, Effect, FlushState, Phase};
