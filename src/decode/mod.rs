//! Record decoders: CSV, JSON, XML.

pub mod csv;
pub mod json;
pub mod xml;

use tokio::sync::mpsc;

use crate::control::AbortSignal;
use crate::error::{Error, Result};
use crate::progress::pulse;

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Emits decoded records while observing the abort signal.
pub(crate) struct RecordSink<R> {
    pub out: mpsc::Sender<R>,
    pub abort: AbortSignal,
    pub progress: Option<mpsc::Sender<()>>,
}

impl<R: Send> RecordSink<R> {
    /// Send one record. `false` means the worker should stop: the run is
    /// aborting or downstream has closed.
    pub async fn emit(&self, rec: R) -> bool {
        tokio::select! {
            _ = self.abort.aborted() => false,
            sent = self.out.send(rec) => {
                if sent.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "intake.decode.downstream_closed", "intake.decode.downstream_closed");
                    false
                } else {
                    pulse(&self.progress, ());
                    true
                }
            }
        }
    }
}

/// Apply the per-record error policy.
///
/// Record-level errors are logged and swallowed unless the stage is set to
/// abort on error; anything else is handed back to end the stage.
pub(crate) fn tolerate(
    _stage: &'static str,
    _input: &str,
    abort_on_error: bool,
    err: Error,
) -> Result<()> {
    if abort_on_error || !err.is_record_level() {
        return Err(err);
    }
    #[cfg(feature = "tracing")]
    tracing::event!(tracing::Level::WARN, event = "intake.decode.record_error", stage = _stage, input = _input, error = %err, "intake.decode.record_error");
    Ok(())
}
