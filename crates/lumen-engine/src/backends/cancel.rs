use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::BackendError;

pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    stop_flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.stop_flag, &other.stop_flag)
    }
}

/// Holds the token of the one call an adapter may have in flight.
#[derive(Debug, Default)]
pub struct CancelSlot {
    current: Mutex<Option<CancelToken>>,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the outstanding call, if any, and installs a fresh token.
    pub fn begin(&self) -> CancelToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = CancelToken::new();
        *current = Some(token.clone());
        token
    }

    pub fn cancel(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = current.take() {
            token.cancel();
        }
    }

    /// Clears the slot if `token` is still the installed one.
    pub fn finish(&self, token: &CancelToken) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|installed| installed.same_as(token)) {
            *current = None;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Runs `job` on a worker thread and waits for it while watching `token`.
///
/// Cancellation returns control to the caller within one poll interval.
/// A blocking HTTP call cannot be interrupted, so the worker is left to
/// finish on its own (bounded by the client's request timeout) and its
/// result is dropped.
pub(crate) fn run_cancellable<T, F>(
    token: &CancelToken,
    poll_interval: Duration,
    job: F,
) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
{
    if token.is_cancelled() {
        return Err(BackendError::cancelled());
    }
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("lumen-backend-call".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|err| BackendError::transport(format!("backend worker spawn failed: {err}")))?;

    loop {
        if token.is_cancelled() {
            return Err(BackendError::cancelled());
        }
        match rx.recv_timeout(poll_interval) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BackendError::transport(
                    "backend worker exited without a result",
                ))
            }
        }
    }
}
