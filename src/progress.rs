use tokio::sync::mpsc;

/// One block of a download landed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub file: String,
    pub bytes: usize,
}

/// One archive finished expanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnzipProgress {
    pub file: String,
    /// Entries emitted after the filter was applied.
    pub entries: usize,
}

/// One bulk flush completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkProgress {
    pub flushed: usize,
}

/// Deliver a pulse without ever blocking the hot path.
///
/// A slow or absent observer drops pulses rather than stalling the stage, so
/// progress is advisory: at-most-once per unit of work, and never a factor in
/// what the stage emits.
pub(crate) fn pulse<T>(sink: &Option<mpsc::Sender<T>>, event: T) {
    if let Some(sink) = sink {
        let _ = sink.try_send(event);
    }
}
