use tokio::sync::mpsc;

use crate::control::Controller;
use crate::error::{Error, Result};

/// Default capacity for stage output queues: a rendezvous hand-off, so
/// back-pressure reaches the producer immediately.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Drain a terminal queue to end-of-stream and surface the run's outcome.
///
/// Items are accumulated while the controller's first error is awaited
/// concurrently, so a stage blocked on reporting can never wedge the drain.
/// Returns the collected items on a clean finish, the first worker error
/// otherwise, or [`Error::Aborted`] when the run was externally aborted.
///
/// This takes over error observation for the controller: do not also call
/// [`Controller::error`] yourself.
pub async fn collect<T>(mut input: mpsc::Receiver<T>, ctrl: &Controller) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let error_fut = ctrl.error();
    tokio::pin!(error_fut);
    let mut outcome_seen = false;

    loop {
        tokio::select! {
            outcome = &mut error_fut, if !outcome_seen => {
                outcome_seen = true;
                if let Some(err) = outcome {
                    return Err(err);
                }
                // Clean finish: keep draining whatever is still buffered.
            }
            msg = input.recv() => {
                match msg {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
        }
    }

    if !outcome_seen {
        if let Some(err) = error_fut.await {
            return Err(err);
        }
    }

    if ctrl.is_aborted() {
        return Err(Error::Aborted);
    }
    Ok(items)
}
