use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::control::{AbortSignal, Controller};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::fetch::{AutoTransport, Fetched, Transport};
use crate::progress::{pulse, DownloadProgress};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// A URL materialized on the local filesystem.
///
/// The open handle travels with the path: whoever receives a `Downloaded`
/// from the output queue owns the file.
#[derive(Debug)]
pub struct Downloaded {
    pub url: String,
    pub path: PathBuf,
    pub file: tokio::fs::File,
}

impl Downloaded {
    /// Read the file into an in-memory [`Entry`], for feeding a decoder
    /// directly when the content is not an archive.
    pub async fn into_entry(self) -> Result<Entry> {
        drop(self.file);
        Entry::from_path(&self.path).await
    }
}

/// Options for a [`Downloader`].
#[derive(Clone)]
pub struct DownloadOpts {
    /// How many downloads run at the same time.
    pub max_parallel: usize,
    /// Directory where downloads are stored.
    pub dir: PathBuf,
    /// Optional pulse per copied block.
    pub progress: Option<mpsc::Sender<DownloadProgress>>,
    /// Remove `dir` once the invoking controller is done.
    pub cleanup: bool,
    /// Capacity of the owned output queue.
    pub buffer: usize,
    pub transport: Arc<dyn Transport>,
}

impl Default for DownloadOpts {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            dir: PathBuf::from("tmp/"),
            progress: None,
            cleanup: false,
            buffer: DEFAULT_QUEUE_CAPACITY,
            transport: Arc::new(AutoTransport::new()),
        }
    }
}

/// Worker pool resolving URLs into local files.
///
/// Remote content is copied in bounded blocks so the abort signal is
/// observed promptly mid-transfer; content that is already local is emitted
/// without a copy. A failed URL is reported on the controller and the worker
/// moves on to the next one.
pub struct Downloader {
    urls: Vec<String>,
    opts: DownloadOpts,
}

impl Downloader {
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            opts: DownloadOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: DownloadOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.opts.max_parallel = n.max(1);
        self
    }

    pub fn download_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.opts.dir = dir.into();
        self
    }

    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.opts.cleanup = cleanup;
        self
    }

    pub fn report_progress_to(mut self, sink: mpsc::Sender<DownloadProgress>) -> Self {
        self.opts.progress = Some(sink);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.opts.transport = transport;
        self
    }

    pub fn buffer(mut self, capacity: usize) -> Self {
        self.opts.buffer = capacity.max(1);
        self
    }

    /// Start downloading into an owned queue. The queue closes once every
    /// worker has exited.
    pub fn start(self, ctrl: &Controller) -> mpsc::Receiver<Downloaded> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx);
        rx
    }

    /// Start downloading into a caller-supplied queue, which the caller
    /// keeps ownership of.
    pub fn start_into(self, ctrl: &Controller, out: mpsc::Sender<Downloaded>) {
        let child = ctrl.child();

        let (url_tx, url_rx) = mpsc::channel(self.urls.len().max(1));
        for url in &self.urls {
            // Capacity covers every seed, so this cannot fail.
            let _ = url_tx.try_send(url.clone());
        }
        drop(url_tx);
        let queue = Arc::new(tokio::sync::Mutex::new(url_rx));

        if self.opts.cleanup {
            let invoker = ctrl.clone();
            let dir = self.opts.dir.clone();
            tokio::spawn(async move {
                invoker.wait().await;
                let _ = tokio::fs::remove_dir_all(&dir).await;
            });
        }

        let worker = Arc::new(DownloadWorker {
            opts: self.opts.clone(),
        });
        for _ in 0..self.opts.max_parallel.max(1) {
            let guard = child.worker_scope();
            let worker = Arc::clone(&worker);
            let ctrl = child.clone();
            let abort = child.abort_signal();
            let queue = Arc::clone(&queue);
            let out = out.clone();
            tokio::spawn(async move {
                let _guard = guard;
                worker.run(ctrl, abort, queue, out).await;
            });
        }

        child.child_built();
    }
}

struct DownloadWorker {
    opts: DownloadOpts,
}

impl DownloadWorker {
    async fn run(
        &self,
        ctrl: Controller,
        abort: AbortSignal,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
        out: mpsc::Sender<Downloaded>,
    ) {
        loop {
            let url = {
                let mut rx = tokio::select! {
                    _ = abort.aborted() => break,
                    guard = queue.lock() => guard,
                };
                tokio::select! {
                    _ = abort.aborted() => break,
                    msg = rx.recv() => msg,
                }
            };
            let Some(url) = url else { break };

            match self.fetch_one(&url, &abort).await {
                Ok(done) => {
                    tokio::select! {
                        _ = abort.aborted() => break,
                        sent = out.send(done) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(Error::Aborted) => break,
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::ERROR, event = "intake.download.error", url = %url, error = %err, "intake.download.error");
                    ctrl.report(err).await;
                    if abort.is_aborted() {
                        break;
                    }
                }
            }
        }
    }

    /// Materialize one URL under the destination directory.
    async fn fetch_one(&self, url: &str, abort: &AbortSignal) -> Result<Downloaded> {
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::INFO, event = "intake.download.open", url = url, "intake.download.open");

        tokio::fs::create_dir_all(&self.opts.dir).await?;

        let mut stream = match self.opts.transport.open(url).await? {
            Fetched::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                return Ok(Downloaded {
                    url: url.to_string(),
                    path,
                    file,
                });
            }
            Fetched::Stream(stream) => stream,
        };

        let name = file_name_of(url);
        let dest = self.opts.dir.join(&name);
        let mut file = tokio::fs::File::create(&dest).await?;

        loop {
            let chunk = tokio::select! {
                _ = abort.aborted() => return Err(Error::Aborted),
                chunk = stream.next_chunk() => chunk?,
            };
            let Some(bytes) = chunk else { break };
            file.write_all(&bytes).await?;
            pulse(
                &self.opts.progress,
                DownloadProgress {
                    file: name.clone(),
                    bytes: bytes.len(),
                },
            );
        }
        file.flush().await?;
        drop(file);

        let file = tokio::fs::File::open(&dest).await?;
        Ok(Downloaded {
            url: url.to_string(),
            path: dest,
            file,
        })
    }
}

fn file_name_of(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() {
        "download".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_comes_from_last_segment() {
        assert_eq!(file_name_of("https://host/a/b/data.zip"), "data.zip");
        assert_eq!(file_name_of("data.csv"), "data.csv");
        assert_eq!(file_name_of("https://host/dir/"), "dir");
    }
}
