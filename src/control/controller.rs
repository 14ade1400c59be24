use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

use crate::control::AbortSignal;
use crate::error::Error;

const ERROR_CHANNEL_CAPACITY: usize = 1;

/// Tracks the lifetime of one pipeline run, or a subregion of one.
///
/// A controller counts the workers attached to it, multiplexes the errors
/// they report, and fans out cancellation through its [`AbortSignal`]. Child
/// controllers bundle a whole stage behind a single worker slot of their
/// parent: the parent sees one worker no matter how many the child manages.
///
/// Cloning a `Controller` clones the handle, not the run.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

struct Shared {
    err_tx: mpsc::Sender<Error>,
    err_rx: Mutex<Option<mpsc::Receiver<Error>>>,
    abort: AbortSignal,
    workers: WorkerCount,
    latch: Mutex<ChildLatch>,
}

/// State of the "child is fully constructed" latch.
enum ChildLatch {
    Root,
    Pending,
    Released,
}

struct WorkerCount {
    count: AtomicUsize,
    zero: Notify,
}

impl WorkerCount {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            zero: Notify::new(),
        }
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "worker_end called without a matching worker_start");
        if prev == 1 {
            self.zero.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Controller {
    /// Build a root controller for a fresh run.
    pub fn new() -> Self {
        let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                err_tx,
                err_rx: Mutex::new(Some(err_rx)),
                abort: AbortSignal::new(),
                workers: WorkerCount::new(),
                latch: Mutex::new(ChildLatch::Root),
            }),
        }
    }

    /// Register a worker. Must be paired with [`Controller::worker_end`].
    pub fn worker_start(&self) {
        self.shared.workers.add();
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::DEBUG, event = "intake.worker.start", "intake.worker.start");
    }

    /// Deregister a worker registered with [`Controller::worker_start`].
    pub fn worker_end(&self) {
        self.shared.workers.done();
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::DEBUG, event = "intake.worker.exit", "intake.worker.exit");
    }

    /// RAII form of `worker_start`/`worker_end`.
    pub fn worker_scope(&self) -> WorkerGuard {
        self.worker_start();
        WorkerGuard {
            ctrl: self.clone(),
        }
    }

    /// The signal workers select on to observe cancellation.
    pub fn abort_signal(&self) -> AbortSignal {
        self.shared.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.abort.is_aborted()
    }

    /// Publish a worker error.
    ///
    /// Never deadlocks during shutdown: once the abort signal closes, the
    /// error is dropped instead of blocking on a channel nobody drains.
    pub async fn report(&self, err: Error) {
        #[cfg(feature = "tracing")]
        let desc = err.to_string();
        tokio::select! {
            _ = self.shared.abort.aborted() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "intake.error.dropped", error = %desc, "intake.error.dropped");
            }
            sent = self.shared.err_tx.send(err) => {
                let _ = sent;
            }
        }
    }

    /// Wait for the worker count to return to zero.
    pub async fn wait(&self) {
        self.shared.workers.wait().await;
    }

    /// Wait for the first worker error, or for a clean finish.
    ///
    /// On an error the abort signal is closed so every stage unwinds; the
    /// error is returned. `None` means every worker exited without reporting.
    ///
    /// The error channel can be consumed once; a second call is a
    /// programming error and panics.
    pub async fn error(&self) -> Option<Error> {
        let mut err_rx = self
            .shared
            .err_rx
            .lock()
            .expect("error receiver lock poisoned")
            .take()
            .expect("error() may only be called once per controller");

        // Biased: a buffered error must win over a simultaneous clean
        // finish, or the outcome would depend on polling order.
        tokio::select! {
            biased;
            err = err_rx.recv() => {
                // The controller holds a sender for its whole lifetime, so
                // recv() only resolves with a published error.
                let err = err?;
                self.shared.abort.abort();
                Some(err)
            }
            _ = self.shared.workers.wait() => None,
        }
    }

    /// Close the abort signal and wait for all workers to unwind.
    ///
    /// Safe to call repeatedly; only the first call closes the signal.
    pub async fn abort(&self) {
        self.shared.abort.abort();
        self.shared.workers.wait().await;
    }

    /// Build a child controller.
    ///
    /// The child counts as exactly one worker of this controller. Its own
    /// worker count is pre-incremented until [`Controller::child_built`]
    /// releases it, so "done" cannot be witnessed while the owning stage is
    /// still attaching workers. A supervisor task forwards the child's
    /// errors upward, closes the child's signal when the parent aborts, and
    /// releases the parent worker slot when the child finishes.
    pub fn child(&self) -> Controller {
        let child = Controller::new();
        *child.shared.latch.lock().expect("child latch lock poisoned") = ChildLatch::Pending;
        child.shared.workers.add();
        self.worker_start();

        let mut child_errs = child
            .shared
            .err_rx
            .lock()
            .expect("error receiver lock poisoned")
            .take()
            .expect("fresh controller must own its error receiver");
        let parent = self.clone();
        let child_handle = child.clone();

        tokio::spawn(async move {
            loop {
                // Biased: drain pending child errors before witnessing the
                // child's completion, so a report just before exit is never
                // dropped.
                tokio::select! {
                    biased;
                    err = child_errs.recv() => {
                        let Some(err) = err else { break };
                        // Forward upward, but never block against a parent
                        // that is simultaneously shutting down.
                        tokio::select! {
                            _ = parent.shared.abort.aborted() => {
                                child_handle.shared.abort.abort();
                                break;
                            }
                            sent = parent.shared.err_tx.send(err) => {
                                let _ = sent;
                            }
                        }
                    }
                    _ = parent.shared.abort.aborted() => {
                        child_handle.shared.abort.abort();
                        break;
                    }
                    _ = child_handle.shared.workers.wait() => break,
                }
            }
            parent.worker_end();
        });

        child
    }

    /// Release a child's construction pre-increment. Idempotent.
    ///
    /// Panics when invoked on a controller that is not a child.
    pub fn child_built(&self) {
        let mut latch = self.shared.latch.lock().expect("child latch lock poisoned");
        match *latch {
            ChildLatch::Root => panic!("child_built called on a non-child controller"),
            ChildLatch::Pending => {
                *latch = ChildLatch::Released;
                self.shared.workers.done();
            }
            ChildLatch::Released => {}
        }
    }

    /// Like [`Controller::child_built`] but a no-op on root controllers.
    /// Used by dependency groups, which may reference either kind.
    pub(crate) fn ensure_built(&self) {
        let mut latch = self.shared.latch.lock().expect("child latch lock poisoned");
        if let ChildLatch::Pending = *latch {
            *latch = ChildLatch::Released;
            self.shared.workers.done();
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one worker slot on a controller; dropping it releases the slot.
pub struct WorkerGuard {
    ctrl: Controller,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.ctrl.worker_end();
    }
}
