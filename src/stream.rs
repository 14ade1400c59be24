use tokio::sync::mpsc;

use crate::control::Controller;
use crate::error::Result;
use crate::progress::pulse;
use crate::queue::{self, DEFAULT_QUEUE_CAPACITY};

/// Options for a [`Streamer`].
pub struct StreamOpts {
    /// Capacity of the owned output queue.
    pub buffer: usize,
    /// Optional pulse per forwarded record.
    pub progress: Option<mpsc::Sender<()>>,
}

impl Default for StreamOpts {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_QUEUE_CAPACITY,
            progress: None,
        }
    }
}

/// A pass-through stage: moves records from an input queue to an output
/// queue under a controller, optionally pulsing progress per record.
///
/// Useful for observing a record stream, re-queueing records into a
/// caller-supplied channel, or collecting a stream to completion.
pub struct Streamer<T> {
    input: mpsc::Receiver<T>,
    opts: StreamOpts,
}

impl<T: Send + 'static> Streamer<T> {
    pub fn new(input: mpsc::Receiver<T>) -> Self {
        Self {
            input,
            opts: StreamOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: StreamOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn buffer(mut self, capacity: usize) -> Self {
        self.opts.buffer = capacity.max(1);
        self
    }

    pub fn report_progress_to(mut self, sink: mpsc::Sender<()>) -> Self {
        self.opts.progress = Some(sink);
        self
    }

    /// Start forwarding into an owned queue; the queue closes once the
    /// worker exits.
    pub fn start(self, ctrl: &Controller) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx);
        rx
    }

    /// Start forwarding into a caller-supplied queue. The caller keeps
    /// ownership: the queue stays open after this stage finishes.
    pub fn start_into(self, ctrl: &Controller, out: mpsc::Sender<T>) {
        let child = ctrl.child();
        let abort = child.abort_signal();
        let guard = child.worker_scope();
        let progress = self.opts.progress;
        let mut input = self.input;

        tokio::spawn(async move {
            let _guard = guard;
            loop {
                tokio::select! {
                    _ = abort.aborted() => break,
                    msg = input.recv() => {
                        let Some(item) = msg else { break };
                        tokio::select! {
                            _ = abort.aborted() => break,
                            sent = out.send(item) => {
                                if sent.is_err() {
                                    break;
                                }
                                pulse(&progress, ());
                            }
                        }
                    }
                }
            }
        });

        child.child_built();
    }

    /// Drain the input to end-of-stream and return the collected records,
    /// or the run's first error.
    pub async fn collect(self, ctrl: &Controller) -> Result<Vec<T>> {
        queue::collect(self.input, ctrl).await
    }
}
