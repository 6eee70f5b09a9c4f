use crate::navigator::Navigator;
use crate::{OrchestratorError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Single-writer gate in front of the shared [`Navigator`].
///
/// Requests are admitted one at a time in the order they started waiting
/// (the underlying tokio mutex is FIFO-fair). Access to the navigator only
/// exists through an [`Admission`], which releases the gate when dropped.
pub struct Serializer {
    navigator: Arc<Mutex<Arc<dyn Navigator>>>,
    admission_timeout: Duration,
    next_ticket: AtomicU64,
    queued: AtomicUsize,
    busy: Arc<AtomicBool>,
    admitted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub busy: bool,
    pub queued: usize,
    pub admitted: u64,
}

impl Serializer {
    pub fn new(navigator: Arc<dyn Navigator>, admission_timeout: Duration) -> Self {
        Self {
            navigator: Arc::new(Mutex::new(navigator)),
            admission_timeout,
            next_ticket: AtomicU64::new(1),
            queued: AtomicUsize::new(0),
            busy: Arc::new(AtomicBool::new(false)),
            admitted: AtomicU64::new(0),
        }
    }

    /// Waits for exclusive use of the navigator.
    ///
    /// Fails with `QueueTimeout` once the admission timeout elapses and with
    /// `Cancelled` if `cancel` fires first; either way the request leaves the
    /// queue without ever touching the navigator.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<Admission> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard::enter(&self.queued);
        let started = Instant::now();

        tracing::debug!(ticket, queued = self.queued.load(Ordering::SeqCst), "Waiting for navigator");

        let lock = self.navigator.clone().lock_owned();
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(ticket, "Request cancelled while queued");
                return Err(OrchestratorError::Cancelled("admission".into()));
            }
            res = tokio::time::timeout(self.admission_timeout, lock) => match res {
                Ok(guard) => guard,
                Err(_) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(ticket, waited_ms, "Request rejected after queue timeout");
                    return Err(OrchestratorError::QueueTimeout { waited_ms });
                }
            },
        };

        self.busy.store(true, Ordering::SeqCst);
        self.admitted.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            ticket,
            waited_ms = started.elapsed().as_millis() as u64,
            "Admitted"
        );

        Ok(Admission {
            guard,
            ticket,
            busy: self.busy.clone(),
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            busy: self.busy.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            admitted: self.admitted.load(Ordering::SeqCst),
        }
    }

    /// Readiness of the navigator. A navigator in use by an admitted request
    /// is reported ready without being probed.
    pub async fn navigator_ready(&self) -> bool {
        match self.navigator.try_lock() {
            Ok(nav) => nav.is_ready().await,
            Err(_) => true,
        }
    }

    /// Waits for the in-flight request, then closes the navigator.
    pub async fn close(&self) {
        let navigator = self.navigator.lock().await;
        navigator.close().await;
        tracing::debug!("Navigator closed");
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive, scoped use of the navigator. Dropping it admits the next request.
pub struct Admission {
    guard: OwnedMutexGuard<Arc<dyn Navigator>>,
    ticket: u64,
    busy: Arc<AtomicBool>,
}

impl Admission {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn navigator(&self) -> &dyn Navigator {
        &**self.guard
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
        tracing::debug!(ticket = self.ticket, "Navigator released");
    }
}
