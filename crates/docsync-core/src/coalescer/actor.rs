use super::machine::{CoalescerMachine, CoalescerSnapshot, Effect, Phase};
use crate::config::CoalescerConfig;
use crate::error::{FlushError, Result, SyncError};
use crate::guard::WriteGuard;
use crate::store::Flusher;
use crate::wait::{poll_slot, sleep_until};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

enum Command<T> {
    Write(T),
    Settle(oneshot::Sender<Phase>),
    Close(oneshot::Sender<Phase>),
}

/// Caller-facing handle to a running coalescer.
///
/// Cheap to clone. Handles can write and observe, but only the owning
/// [`Coalescer`] can stop the actor.
pub struct CoalescerHandle<T> {
    href: Arc<str>,
    tx: mpsc::UnboundedSender<Command<T>>,
    state: watch::Receiver<CoalescerSnapshot<T>>,
}

impl<T> Clone for CoalescerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            href: Arc::clone(&self.href),
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T> std::fmt::Debug for CoalescerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescerHandle")
            .field("href", &self.href)
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T> CoalescerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Enqueues a `WRITE`.
    ///
    /// Never blocks. Fails once the mailbox has been closed or the coalescer
    /// has been stopped.
    pub fn write(&self, value: T) -> Result<()> {
        self.tx
            .send(Command::Write(value))
            .map_err(|_| self.stopped_error())
    }

    /// Returns the most recently published state.
    pub fn snapshot(&self) -> CoalescerSnapshot<T> {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// True once the coalescer no longer accepts writes.
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    /// Subscribes to state changes. Every transition publishes a new value.
    pub fn subscribe(&self) -> watch::Receiver<CoalescerSnapshot<T>> {
        self.state.clone()
    }

    /// Returns the phase after every command queued before this call has
    /// been processed.
    ///
    /// Unlike [`phase`](Self::phase), this cannot miss a write that is still
    /// sitting in the mailbox.
    pub async fn settled_phase(&self) -> Result<Phase> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Settle(reply))
            .map_err(|_| self.stopped_error())?;
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Closes the mailbox and returns the phase after every command queued
    /// before the close has been applied.
    ///
    /// Later writes fail with [`SyncError::CoalescerStopped`]. A pending
    /// debounce or flush still runs to completion. Once the mailbox is closed
    /// this returns the published phase.
    pub async fn close_writes(&self) -> Result<Phase> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Close(reply)).is_err() {
            return Ok(self.phase());
        }
        rx.await.map_err(|_| self.stopped_error())
    }

    /// Resolves once the coalescer publishes `IDLE`.
    ///
    /// Returns immediately if it is idle already.
    pub async fn drained(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|snapshot| snapshot.phase.is_idle())
            .await
            .map(|_| ())
            .map_err(|_| self.stopped_error())
    }

    fn stopped_error(&self) -> SyncError {
        SyncError::CoalescerStopped {
            href: self.href.to_string(),
        }
    }
}

/// Owner of one write coalescer actor.
///
/// Dropping the owner cancels the actor; [`Coalescer::stop`] also waits for
/// it to exit.
pub struct Coalescer<T> {
    handle: CoalescerHandle<T>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns a coalescer in `IDLE`, seeded with `initial`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        href: impl Into<String>,
        initial: T,
        config: &CoalescerConfig,
        flusher: Arc<dyn Flusher<T>>,
        guard: Arc<dyn WriteGuard<T>>,
    ) -> Self {
        let href: Arc<str> = Arc::from(href.into());
        let machine = CoalescerMachine::new(initial);
        let (state_tx, state_rx) = watch::channel(machine.snapshot());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = CoalescerTask {
            href: Arc::clone(&href),
            machine,
            debounce: config.debounce(),
            flusher,
            guard,
            state: state_tx,
        };

        tracing::debug!("Spawning coalescer for {} (debounce: {:?})", href, task.debounce);
        let task = tokio::spawn(task.run(rx, cancel.clone()));

        Self {
            handle: CoalescerHandle {
                href,
                tx,
                state: state_rx,
            },
            cancel,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> &CoalescerHandle<T> {
        &self.handle
    }

    /// Terminates the actor and waits for it to exit.
    ///
    /// An in-flight flush is abandoned. Calling this more than once is a no-op.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::warn!("Coalescer for {} exited abnormally: {}", self.handle.href, e);
        }
        tracing::debug!("Coalescer for {} stopped", self.handle.href);
    }
}

impl<T> Drop for Coalescer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type FlushFuture = BoxFuture<'static, std::result::Result<(), FlushError>>;

struct CoalescerTask<T> {
    href: Arc<str>,
    machine: CoalescerMachine<T>,
    debounce: Duration,
    flusher: Arc<dyn Flusher<T>>,
    guard: Arc<dyn WriteGuard<T>>,
    state: watch::Sender<CoalescerSnapshot<T>>,
}

impl<T> CoalescerTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>, cancel: CancellationToken) {
        let mut deadline: Option<Instant> = None;
        let mut in_flight: Option<FlushFuture> = None;
        let mut closing: Option<oneshot::Sender<Phase>> = None;
        let mut mailbox_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = poll_slot(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    let effect = match result {
                        Ok(()) => {
                            tracing::debug!("Flush succeeded for {}", self.href);
                            self.machine.flush_succeeded()
                        }
                        Err(e) => {
                            tracing::warn!("Flush failed for {}: {}", self.href, e);
                            self.machine.flush_failed(e.to_string())
                        }
                    };
                    self.apply(effect, &mut deadline, &mut in_flight);
                }
                cmd = rx.recv(), if mailbox_open => match cmd {
                    Some(Command::Write(value)) => {
                        let effect = self.machine.write(value, self.guard.as_ref());
                        if effect.is_none() && !self.machine.phase().is_flushing() {
                            tracing::trace!("Write to {} rejected by guard", self.href);
                            continue;
                        }
                        self.apply(effect, &mut deadline, &mut in_flight);
                    }
                    Some(Command::Settle(reply)) => {
                        let _ = reply.send(self.machine.phase());
                    }
                    Some(Command::Close(reply)) => {
                        tracing::debug!("Closing mailbox for {}", self.href);
                        rx.close();
                        closing = Some(reply);
                    }
                    None => {
                        mailbox_open = false;
                        let Some(reply) = closing.take() else {
                            // All senders dropped without a close.
                            break;
                        };
                        let _ = reply.send(self.machine.phase());
                    }
                },
                () = sleep_until(deadline), if deadline.is_some() => {
                    deadline = None;
                    let effect = self.machine.debounce_elapsed();
                    self.apply(effect, &mut deadline, &mut in_flight);
                }
            }
        }

        tracing::trace!("Coalescer loop for {} exited", self.href);
    }

    fn apply(
        &mut self,
        effect: Option<Effect<T>>,
        deadline: &mut Option<Instant>,
        in_flight: &mut Option<FlushFuture>,
    ) {
        match effect {
            None => {}
            Some(Effect::ArmDebounce) => {
                *deadline = Some(Instant::now() + self.debounce);
            }
            Some(Effect::StartFlush(snapshot)) => {
                *deadline = None;
                let flusher = Arc::clone(&self.flusher);
                let href = Arc::clone(&self.href);
                *in_flight = Some(Box::pin(async move { flusher.flush(&href, snapshot).await }));
            }
            Some(Effect::Drained) => {
                tracing::debug!("Coalescer for {} drained", self.href);
            }
        }

        tracing::debug!("Coalescer for {} is now {}", self.href, self.machine.phase());
        self.state.send_replace(self.machine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalescer::FlushState;
    use crate::guard::{AcceptAll, SkipUnchanged};
    use crate::test_utils::test_helpers::RecordingFlusher;

    fn spawn_with(
        flusher: Arc<RecordingFlusher>,
        debounce_ms: u64,
        guard: Arc<dyn WriteGuard<String>>,
    ) -> Coalescer<String> {
        Coalescer::spawn(
            "notes.md",
            "contents".to_string(),
            &CoalescerConfig { debounce_ms },
            flusher,
            guard,
        )
    }

    async fn wait_for_phase(
        handle: &CoalescerHandle<String>,
        phase: Phase,
    ) -> CoalescerSnapshot<String> {
        handle
            .subscribe()
            .wait_for(|s| s.phase == phase)
            .await
            .unwrap()
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_debounce_write_flushes_and_returns_idle() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(Arc::clone(&flusher), 0, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("new contents".to_string()).unwrap();
        assert_eq!(handle.settled_phase().await.unwrap(), Phase::Debounce);

        handle.drained().await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.latest_contents, "new contents");
        assert!(!snapshot.dirty);
        assert!(snapshot.error.is_none());
        assert_eq!(flusher.calls(), vec!["new contents"]);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_writes_is_coalesced() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(Arc::clone(&flusher), 100, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        for i in 0..10 {
            handle.write(format!("draft {i}")).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        handle.drained().await.unwrap();
        assert_eq!(flusher.calls(), vec!["draft 9"]);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_timer_resets_on_write() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(Arc::clone(&flusher), 100, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("a".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.write("b".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(handle.settled_phase().await.unwrap(), Phase::Debounce);
        assert!(flusher.calls().is_empty());

        handle.drained().await.unwrap();
        assert_eq!(flusher.calls(), vec!["b"]);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_rejection_leaves_idle() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(Arc::clone(&flusher), 0, Arc::new(SkipUnchanged));
        let handle = coalescer.handle().clone();

        handle.write("contents".to_string()).unwrap();
        assert_eq!(handle.settled_phase().await.unwrap(), Phase::Idle);
        assert!(!handle.snapshot().dirty);
        assert!(flusher.calls().is_empty());

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_with_newer_write_retries_latest() {
        let (flusher, gate) = RecordingFlusher::gated();
        let flusher = Arc::new(flusher);
        flusher.fail_next("net error");
        let mut coalescer = spawn_with(Arc::clone(&flusher), 10, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("a".to_string()).unwrap();
        wait_for_phase(&handle, Phase::Flushing(FlushState::Clean)).await;
        assert_eq!(flusher.calls(), vec!["a"]);

        handle.write("b".to_string()).unwrap();
        let snapshot = wait_for_phase(&handle, Phase::Flushing(FlushState::Dirty)).await;
        assert_eq!(snapshot.latest_contents, "b");

        gate.add_permits(1);
        let snapshot = wait_for_phase(&handle, Phase::Debounce).await;
        assert_eq!(snapshot.error.as_deref(), Some("net error"));
        assert_eq!(snapshot.latest_contents, "b");
        assert!(snapshot.dirty);

        gate.add_permits(1);
        handle.drained().await.unwrap();
        let snapshot = handle.snapshot();
        assert!(snapshot.error.is_none());
        assert!(!snapshot.dirty);
        assert_eq!(flusher.calls(), vec!["a", "b"]);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_flush_in_flight() {
        let (flusher, gate) = RecordingFlusher::gated();
        let flusher = Arc::new(flusher);
        let mut coalescer = spawn_with(Arc::clone(&flusher), 5, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("first".to_string()).unwrap();
        wait_for_phase(&handle, Phase::Flushing(FlushState::Clean)).await;

        for i in 0..5 {
            handle.write(format!("later {i}")).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(flusher.calls(), vec!["first"]);

        gate.add_permits(2);
        handle.drained().await.unwrap();
        assert_eq!(flusher.calls(), vec!["first", "later 4"]);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_coalescer_rejects_writes() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(flusher, 0, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        coalescer.stop().await;
        coalescer.stop().await;

        assert!(handle.is_stopped());
        assert!(matches!(
            handle.write("late".to_string()),
            Err(SyncError::CoalescerStopped { .. })
        ));
        assert!(handle.settled_phase().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_writes_applies_queued_writes_then_rejects() {
        let flusher = Arc::new(RecordingFlusher::new());
        let mut coalescer = spawn_with(Arc::clone(&flusher), 10, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("queued".to_string()).unwrap();
        assert_eq!(handle.close_writes().await.unwrap(), Phase::Debounce);
        assert!(handle.is_stopped());
        assert!(matches!(
            handle.write("late".to_string()),
            Err(SyncError::CoalescerStopped { .. })
        ));

        handle.drained().await.unwrap();
        assert_eq!(flusher.calls(), vec!["queued"]);
        assert_eq!(handle.close_writes().await.unwrap(), Phase::Idle);

        coalescer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_pending_while_flushing() {
        let (flusher, gate) = RecordingFlusher::gated();
        let mut coalescer = spawn_with(Arc::new(flusher), 0, Arc::new(AcceptAll));
        let handle = coalescer.handle().clone();

        handle.write("x".to_string()).unwrap();
        wait_for_phase(&handle, Phase::Flushing(FlushState::Clean)).await;

        let mut drained = tokio_test::task::spawn(handle.drained());
        tokio_test::assert_pending!(drained.poll());

        gate.add_permits(1);
        handle.drained().await.unwrap();
        assert!(drained.is_woken());
        tokio_test::assert_ready_ok!(drained.poll());

        coalescer.stop().await;
    }
}
