//! Optional branches for the actors' `select!` loops.
//!
//! Both resolve only when the slot is filled, so a loop can keep at most one
//! timer and one in-flight operation in plain `Option`s.

use std::future::Future;
use tokio::time::Instant;

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
