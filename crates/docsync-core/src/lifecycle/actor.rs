use super::phase::{DocumentSnapshot, LifecyclePhase};
use crate::coalescer::{Coalescer, CoalescerHandle};
use crate::config::{CoalescerConfig, SyncConfig};
use crate::error::{LoadError, Result, SyncError};
use crate::guard::WriteGuard;
use crate::store::{Flusher, Loader};
use crate::wait::{poll_slot, sleep_until};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Load,
    Exit,
}

enum Input<T> {
    Event(Event),
    Loaded(std::result::Result<T, LoadError>),
    Retry,
    Drained(Result<()>),
}

/// What the run loop must wait on after entering a phase.
enum Entry<T> {
    Load(BoxFuture<'static, std::result::Result<T, LoadError>>),
    Retry(Instant),
    Drain(BoxFuture<'static, Result<()>>),
    Idle,
}

/// Caller-facing handle to a document.
///
/// Cheap to clone. When the last handle is dropped the document receives an
/// implicit `EXIT`.
pub struct DocumentHandle<T> {
    href: Arc<str>,
    tx: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<DocumentSnapshot<T>>,
}

impl<T> Clone for DocumentHandle<T> {
    fn clone(&self) -> Self {
        Self {
            href: Arc::clone(&self.href),
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T> std::fmt::Debug for DocumentHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("href", &self.href)
            .field("phase", &self.state.borrow().phase)
            .finish_non_exhaustive()
    }
}

impl<T> DocumentHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Sends `LOAD`. Ignored unless the document is still in `PRE_LOAD`.
    pub fn load(&self) -> Result<()> {
        self.send(Event::Load)
    }

    /// Sends `EXIT`.
    pub fn exit(&self) -> Result<()> {
        self.send(Event::Exit)
    }

    pub fn snapshot(&self) -> DocumentSnapshot<T> {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<DocumentSnapshot<T>> {
        self.state.clone()
    }

    /// Handle to the owned coalescer. Present only in `RUNNING` and `CLEANUP`.
    pub fn persister(&self) -> Option<CoalescerHandle<T>> {
        self.state.borrow().persister.clone()
    }

    /// Routes a write to the persister.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] when the document has no persister.
    pub fn write(&self, value: T) -> Result<()> {
        let (persister, phase) = {
            let state = self.state.borrow();
            (state.persister.clone(), state.phase)
        };
        match persister {
            Some(persister) => persister.write(value),
            None => Err(SyncError::NotRunning {
                href: self.href.to_string(),
                phase: phase.to_string(),
            }),
        }
    }

    /// Waits until the published phase satisfies `pred` and returns that
    /// snapshot.
    pub async fn wait_for_phase<F>(&self, mut pred: F) -> Result<DocumentSnapshot<T>>
    where
        F: FnMut(LifecyclePhase) -> bool,
    {
        let mut state = self.state.clone();
        state
            .wait_for(|snapshot| pred(snapshot.phase))
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| self.stopped_error())
    }

    /// Resolves once the document reaches `STOPPED`.
    pub async fn stopped(&self) -> Result<()> {
        self.wait_for_phase(LifecyclePhase::is_terminal).await.map(|_| ())
    }

    /// Sends `EXIT` and waits for `STOPPED`.
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.exit() {
            tracing::debug!("EXIT for {} not delivered: {}", self.href, e);
        }
        self.stopped().await
    }

    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    fn send(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| self.stopped_error())
    }

    fn stopped_error(&self) -> SyncError {
        SyncError::DocumentStopped {
            href: self.href.to_string(),
        }
    }
}

/// Lifecycle manager for one document.
///
/// Runs as a tokio task that owns the document's coalescer. Callers only ever
/// see a [`DocumentHandle`].
pub struct DocumentLifecycle<T> {
    href: Arc<str>,
    phase: LifecyclePhase,
    contents: Option<T>,
    error: Option<String>,
    persister: Option<Coalescer<T>>,
    coalescer_config: CoalescerConfig,
    retry_delay: Duration,
    loader: Arc<dyn Loader<T>>,
    flusher: Arc<dyn Flusher<T>>,
    guard: Arc<dyn WriteGuard<T>>,
    state: watch::Sender<DocumentSnapshot<T>>,
}

impl<T> DocumentLifecycle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns a document in `PRE_LOAD`. Nothing is loaded until `LOAD`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        href: impl Into<String>,
        config: &SyncConfig,
        loader: Arc<dyn Loader<T>>,
        flusher: Arc<dyn Flusher<T>>,
        guard: Arc<dyn WriteGuard<T>>,
    ) -> DocumentHandle<T> {
        let href: Arc<str> = Arc::from(href.into());
        let (state_tx, state_rx) = watch::channel(DocumentSnapshot::new(&*href));
        let (tx, rx) = mpsc::unbounded_channel();

        let lifecycle = Self {
            href: Arc::clone(&href),
            phase: LifecyclePhase::PreLoad,
            contents: None,
            error: None,
            persister: None,
            coalescer_config: config.coalescer.clone(),
            retry_delay: config.lifecycle.retry_delay(),
            loader,
            flusher,
            guard,
            state: state_tx,
        };
        tokio::spawn(lifecycle.run(rx));

        DocumentHandle {
            href,
            tx,
            state: state_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        let mut pending_load: Option<BoxFuture<'static, std::result::Result<T, LoadError>>> = None;
        let mut retry_at: Option<Instant> = None;
        let mut drain: Option<BoxFuture<'static, Result<()>>> = None;
        let mut mailbox_open = true;

        while !self.phase.is_terminal() {
            let input = tokio::select! {
                biased;
                event = rx.recv(), if mailbox_open => match event {
                    Some(event) => Input::Event(event),
                    None => {
                        tracing::debug!("All handles to {} dropped, exiting", self.href);
                        mailbox_open = false;
                        Input::Event(Event::Exit)
                    }
                },
                result = poll_slot(&mut pending_load), if pending_load.is_some() => {
                    Input::Loaded(result)
                }
                () = sleep_until(retry_at), if retry_at.is_some() => Input::Retry,
                result = poll_slot(&mut drain), if drain.is_some() => Input::Drained(result),
                else => break,
            };

            let Some(next) = self.handle(input).await else {
                continue;
            };

            pending_load = None;
            retry_at = None;
            drain = None;
            match self.enter(next).await {
                Entry::Load(load) => pending_load = Some(load),
                Entry::Retry(at) => retry_at = Some(at),
                Entry::Drain(wait) => drain = Some(wait),
                Entry::Idle => {}
            }
            self.publish();
        }

        if !self.phase.is_terminal() {
            tracing::warn!("Lifecycle for {} has nothing left to wait on, stopping", self.href);
            self.enter(LifecyclePhase::Stopped).await;
            self.publish();
        }
    }

    /// Applies one input to the current phase and returns the phase to enter,
    /// if any.
    async fn handle(&mut self, input: Input<T>) -> Option<LifecyclePhase> {
        match (self.phase, input) {
            (LifecyclePhase::PreLoad, Input::Event(Event::Load)) => Some(LifecyclePhase::Loading),
            (_, Input::Event(Event::Load)) => {
                tracing::trace!("Ignoring LOAD for {} in {}", self.href, self.phase);
                None
            }

            (LifecyclePhase::Loading, Input::Loaded(Ok(contents))) => {
                self.contents = Some(contents);
                self.error = None;
                Some(LifecyclePhase::Running)
            }
            (LifecyclePhase::Loading, Input::Loaded(Err(e))) => {
                tracing::warn!("Failed to load {}: {}", self.href, e);
                self.error = Some(e.to_string());
                Some(LifecyclePhase::WaitRetry)
            }

            (LifecyclePhase::WaitRetry, Input::Retry) => Some(LifecyclePhase::Loading),

            (LifecyclePhase::Running, Input::Event(Event::Exit))
            | (LifecyclePhase::Cleanup, Input::Drained(Ok(()))) => Some(self.drain_or_stop().await),
            (LifecyclePhase::Cleanup, Input::Drained(Err(e))) => {
                tracing::warn!("Persister for {} went away while draining: {}", self.href, e);
                Some(LifecyclePhase::Stopped)
            }

            (LifecyclePhase::Cleanup | LifecyclePhase::Stopped, Input::Event(Event::Exit)) => None,
            (_, Input::Event(Event::Exit)) => Some(LifecyclePhase::Stopped),

            (phase, _) => {
                tracing::trace!("Dropping stale input for {} in {}", self.href, phase);
                None
            }
        }
    }

    async fn enter(&mut self, next: LifecyclePhase) -> Entry<T> {
        tracing::debug!("{}: {} -> {}", self.href, self.phase, next);
        self.phase = next;

        match next {
            LifecyclePhase::PreLoad => Entry::Idle,
            LifecyclePhase::Loading => {
                let loader = Arc::clone(&self.loader);
                let href = Arc::clone(&self.href);
                Entry::Load(Box::pin(async move { loader.load(&href).await }))
            }
            LifecyclePhase::WaitRetry => Entry::Retry(Instant::now() + self.retry_delay),
            LifecyclePhase::Running => {
                if let Some(contents) = &self.contents {
                    self.persister = Some(Coalescer::spawn(
                        &*self.href,
                        contents.clone(),
                        &self.coalescer_config,
                        Arc::clone(&self.flusher),
                        Arc::clone(&self.guard),
                    ));
                }
                tracing::info!("{} is running", self.href);
                Entry::Idle
            }
            LifecyclePhase::Cleanup => match &self.persister {
                Some(persister) => {
                    let handle = persister.handle().clone();
                    Entry::Drain(Box::pin(async move { handle.drained().await }))
                }
                None => Entry::Idle,
            },
            LifecyclePhase::Stopped => {
                if let Some(mut persister) = self.persister.take() {
                    persister.stop().await;
                }
                tracing::info!("{} stopped", self.href);
                Entry::Idle
            }
        }
    }

    /// Chooses between `CLEANUP` and `STOPPED` once the document wants to exit.
    ///
    /// `IDLE` is only final after the persister's mailbox is closed; until
    /// then a write can still slip in behind the check.
    async fn drain_or_stop(&self) -> LifecyclePhase {
        let Some(persister) = &self.persister else {
            return LifecyclePhase::Stopped;
        };
        let handle = persister.handle();

        let phase = match handle.settled_phase().await {
            Ok(phase) if !phase.is_idle() => phase,
            _ => match handle.close_writes().await {
                Ok(phase) => phase,
                Err(e) => {
                    tracing::warn!("Persister for {} went away before exit: {}", self.href, e);
                    return LifecyclePhase::Stopped;
                }
            },
        };

        if phase.is_idle() {
            LifecyclePhase::Stopped
        } else {
            tracing::debug!("{} has unflushed writes ({}), draining", self.href, phase);
            LifecyclePhase::Cleanup
        }
    }

    fn publish(&self) {
        self.state.send_replace(DocumentSnapshot {
            href: self.href.to_string(),
            phase: self.phase,
            contents: self.contents.clone(),
            error: self.error.clone(),
            persister: self.persister.as_ref().map(|p| p.handle().clone()),
        });
    }
}
