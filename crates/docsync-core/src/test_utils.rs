//! Test utilities: scriptable loaders and flushers.

#[cfg(test)]
pub(crate) mod test_helpers {
    use crate::error::{FlushError, LoadError};
    use crate::store::{Flusher, Loader};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Flusher that records every snapshot it is handed.
    ///
    /// Failures are scripted up front and consumed in order. When gated,
    /// each flush blocks until the test releases one permit, which keeps the
    /// coalescer parked in `FLUSHING` for as long as the test needs.
    #[derive(Default)]
    pub struct RecordingFlusher {
        calls: Mutex<Vec<String>>,
        failures: Mutex<VecDeque<String>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl RecordingFlusher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn gated() -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let flusher = Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::default()
            };
            (flusher, gate)
        }

        pub fn fail_next(&self, message: &str) {
            self.failures.lock().unwrap().push_back(message.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Flusher<String> for RecordingFlusher {
        async fn flush(&self, _href: &str, contents: String) -> Result<(), FlushError> {
            self.calls.lock().unwrap().push(contents);
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| FlushError::new(e.to_string()))?
                    .forget();
            }
            match self.failures.lock().unwrap().pop_front() {
                Some(message) => Err(FlushError::new(message)),
                None => Ok(()),
            }
        }
    }

    /// Loader that replays a script of results, then keeps succeeding with
    /// the fallback contents.
    pub struct ScriptedLoader {
        script: Mutex<VecDeque<Result<String, LoadError>>>,
        fallback: String,
        calls: AtomicUsize,
    }

    impl ScriptedLoader {
        pub fn ok(contents: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: contents.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing_first(failures: usize, message: &str, contents: &str) -> Self {
            let script = (0..failures)
                .map(|_| Err(LoadError::new(message)))
                .collect();
            Self {
                script: Mutex::new(script),
                fallback: contents.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Loader<String> for ScriptedLoader {
        async fn load(&self, _href: &str) -> Result<String, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }
}
