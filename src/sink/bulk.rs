use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

use crate::control::{AbortSignal, Controller};
use crate::error::{Error, Result};
use crate::progress::{pulse, BulkProgress};

/// One batched write operation.
pub struct BulkAction {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub payload: Value,
}

/// A record that knows how to project itself into a bulk write.
///
/// Returning `None` skips the record.
pub trait BulkWritable: Send + 'static {
    fn for_bulk(&self) -> Option<BulkAction>;
}

/// The batched remote writer behind the sink, e.g. a search-index bulk API.
#[async_trait]
pub trait BulkTarget: Send + Sync + 'static {
    async fn write(&self, batch: Vec<BulkAction>) -> Result<FlushReport>;
}

/// Outcome of one flush. Per-action failures are reported individually so
/// a partially failed flush can keep the run alive.
#[derive(Default)]
pub struct FlushReport {
    pub failures: Vec<BulkFailure>,
}

pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// Options for a [`BulkWriter`].
#[derive(Clone)]
pub struct BulkOpts {
    /// Flush when this many actions are pending. `None` disables the
    /// count trigger.
    pub max_pending: Option<usize>,
    /// Flush when the pending payloads reach this many bytes. `None`
    /// disables the size trigger.
    pub flush_bytes: Option<usize>,
    /// Flush on this wall-clock cadence. `None` disables the timer.
    pub flush_interval: Option<Duration>,
    pub abort_on_error: bool,
    /// Optional pulse per completed flush.
    pub progress: Option<mpsc::Sender<BulkProgress>>,
}

impl Default for BulkOpts {
    fn default() -> Self {
        Self {
            max_pending: None,
            flush_bytes: Some(15_000_000),
            flush_interval: Some(Duration::from_secs(300)),
            abort_on_error: false,
            progress: None,
        }
    }
}

/// Back-pressured batching facade in front of a [`BulkTarget`].
///
/// Records are drained off the input queue into a pending batch; crossing
/// any enabled threshold, or the flush timer, hands the batch to the
/// target. Per-action failures within a flush are logged and the stage
/// keeps going unless it is set to abort on error.
pub struct BulkWriter<W, T> {
    input: mpsc::Receiver<W>,
    target: Arc<T>,
    opts: BulkOpts,
}

impl<W: BulkWritable, T: BulkTarget> BulkWriter<W, T> {
    pub fn new(input: mpsc::Receiver<W>, target: Arc<T>) -> Self {
        Self {
            input,
            target,
            opts: BulkOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: BulkOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Flush after this many pending actions; `None` disables.
    pub fn max_pending(mut self, count: Option<usize>) -> Self {
        self.opts.max_pending = count;
        self
    }

    /// Flush after this many pending payload bytes; `None` disables.
    pub fn flush_bytes(mut self, bytes: Option<usize>) -> Self {
        self.opts.flush_bytes = bytes;
        self
    }

    /// Flush on this cadence; `None` disables.
    pub fn flush_every(mut self, interval: Option<Duration>) -> Self {
        self.opts.flush_interval = interval;
        self
    }

    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.opts.abort_on_error = abort;
        self
    }

    pub fn report_progress_to(mut self, sink: mpsc::Sender<BulkProgress>) -> Self {
        self.opts.progress = Some(sink);
        self
    }

    /// Start draining records under the given controller.
    pub fn start(self, ctrl: &Controller) {
        let child = ctrl.child();
        let guard = child.worker_scope();
        let abort = child.abort_signal();
        let reporter = child.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = self.run(&abort).await {
                reporter.report(err).await;
            }
        });

        child.child_built();
    }

    async fn run(self, abort: &AbortSignal) -> Result<()> {
        let Self {
            mut input,
            target,
            opts,
        } = self;
        let mut batch: Vec<BulkAction> = Vec::new();
        let mut batch_bytes = 0_usize;
        let pending = AtomicUsize::new(0);
        let mut timer = opts
            .flush_interval
            .map(|interval| tokio::time::interval_at(Instant::now() + interval, interval));

        loop {
            tokio::select! {
                _ = abort.aborted() => return Ok(()),
                _ = tick(&mut timer) => {
                    flush(&*target, &opts, &mut batch, &mut batch_bytes, &pending).await?;
                }
                msg = input.recv() => {
                    let Some(rec) = msg else { break };
                    let Some(action) = rec.for_bulk() else { continue };
                    batch_bytes += payload_bytes(&action.payload);
                    batch.push(action);
                    pending.fetch_add(1, Ordering::SeqCst);

                    let count_hit = opts
                        .max_pending
                        .is_some_and(|limit| batch.len() >= limit);
                    let bytes_hit = opts
                        .flush_bytes
                        .is_some_and(|limit| batch_bytes >= limit);
                    if count_hit || bytes_hit {
                        flush(&*target, &opts, &mut batch, &mut batch_bytes, &pending).await?;
                    }
                }
            }
        }

        flush(&*target, &opts, &mut batch, &mut batch_bytes, &pending).await
    }
}

async fn flush<T: BulkTarget>(
    target: &T,
    opts: &BulkOpts,
    batch: &mut Vec<BulkAction>,
    batch_bytes: &mut usize,
    pending: &AtomicUsize,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let actions = std::mem::take(batch);
    *batch_bytes = 0;

    match target.write(actions).await {
        Ok(report) => {
            for failure in &report.failures {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::ERROR, event = "intake.bulk.action_failed", id = %failure.id, reason = %failure.reason, "intake.bulk.action_failed");
                let _ = failure;
            }
            if opts.abort_on_error {
                if let Some(failure) = report.failures.first() {
                    return Err(Error::transport(format!(
                        "bulk write failed for {}: {}",
                        failure.id, failure.reason
                    )));
                }
            }
            let flushed = pending.swap(0, Ordering::SeqCst);
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::DEBUG, event = "intake.bulk.flushed", flushed = flushed, "intake.bulk.flushed");
            pulse(&opts.progress, BulkProgress { flushed });
        }
        Err(err) => {
            if opts.abort_on_error {
                return Err(err);
            }
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::ERROR, event = "intake.bulk.flush_failed", error = %err, "intake.bulk.flush_failed");
            let _ = err;
            pending.swap(0, Ordering::SeqCst);
        }
    }
    Ok(())
}

fn payload_bytes(payload: &Value) -> usize {
    serde_json::to_vec(payload).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Resolve on the timer's next tick, or never when the timer is disabled.
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
