//! Write acceptance guards.
//!
//! A guard decides whether an incoming write should replace the coalescer's
//! current contents. Rejected writes cause no transition at all.

/// Predicate consulted on every `WRITE`.
pub trait WriteGuard<T>: Send + Sync {
    fn should_write(&self, current: &T, incoming: &T) -> bool;
}

/// Accepts every write. This is the default guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<T> WriteGuard<T> for AcceptAll {
    fn should_write(&self, _current: &T, _incoming: &T) -> bool {
        true
    }
}

/// Rejects writes whose value equals the current contents.
///
/// # Examples
///
/// ```
/// use docsync_core::guard::{SkipUnchanged, WriteGuard};
///
/// let guard = SkipUnchanged;
/// assert!(!guard.should_write(&"same".to_string(), &"same".to_string()));
/// assert!(guard.should_write(&"old".to_string(), &"new".to_string()));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipUnchanged;

impl<T: PartialEq> WriteGuard<T> for SkipUnchanged {
    fn should_write(&self, current: &T, incoming: &T) -> bool {
        current != incoming
    }
}

impl<T, F> WriteGuard<T> for F
where
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    fn should_write(&self, current: &T, incoming: &T) -> bool {
        self(current, incoming)
    }
}
