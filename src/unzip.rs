use std::io::Read;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::control::{AbortSignal, Controller};
use crate::download::{DownloadOpts, Downloaded, Downloader};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::progress::{pulse, UnzipProgress};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Options for an [`Unzipper`].
#[derive(Clone)]
pub struct UnzipOpts {
    /// How many archives expand at the same time.
    pub max_parallel: usize,
    /// Glob pattern selecting inner entries; `None` keeps everything.
    pub filter: Option<String>,
    /// Optional pulse per expanded archive.
    pub progress: Option<mpsc::Sender<UnzipProgress>>,
    /// Capacity of the owned output queue.
    pub buffer: usize,
    /// Options for the internal download stage used by
    /// [`Unzipper::from_urls`].
    pub download: DownloadOpts,
}

impl Default for UnzipOpts {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            filter: None,
            progress: None,
            buffer: DEFAULT_QUEUE_CAPACITY,
            download: DownloadOpts::default(),
        }
    }
}

enum UnzipInput {
    Queue(mpsc::Receiver<Downloaded>),
    Urls(Vec<String>),
}

/// Worker pool turning downloaded zip archives into a stream of inner
/// entries.
///
/// Archive enumeration is blocking work and runs on the blocking pool. An
/// error opening any inner entry discards what was already collected for
/// that archive and reports one archive error.
pub struct Unzipper {
    input: UnzipInput,
    opts: UnzipOpts,
}

impl Unzipper {
    /// Expand archives arriving on an existing queue, typically a
    /// [`Downloader`]'s output.
    pub fn new(input: mpsc::Receiver<Downloaded>) -> Self {
        Self {
            input: UnzipInput::Queue(input),
            opts: UnzipOpts::default(),
        }
    }

    /// Download the given URLs and expand each one, chaining an internal
    /// download stage configured through [`UnzipOpts::download`].
    pub fn from_urls(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            input: UnzipInput::Urls(urls.into_iter().map(Into::into).collect()),
            opts: UnzipOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: UnzipOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.opts.max_parallel = n.max(1);
        self
    }

    /// Keep only entries whose name matches the glob pattern.
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.opts.filter = Some(pattern.into());
        self
    }

    pub fn report_progress_to(mut self, sink: mpsc::Sender<UnzipProgress>) -> Self {
        self.opts.progress = Some(sink);
        self
    }

    pub fn download_opts(mut self, opts: DownloadOpts) -> Self {
        self.opts.download = opts;
        self
    }

    pub fn buffer(mut self, capacity: usize) -> Self {
        self.opts.buffer = capacity.max(1);
        self
    }

    /// Start expanding into an owned queue. The queue closes once every
    /// worker has exited.
    pub fn start(self, ctrl: &Controller) -> mpsc::Receiver<Entry> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx);
        rx
    }

    /// Start expanding into a caller-supplied queue, which the caller keeps
    /// ownership of.
    pub fn start_into(self, ctrl: &Controller, out: mpsc::Sender<Entry>) {
        let child = ctrl.child();

        let input = match self.input {
            UnzipInput::Queue(rx) => rx,
            UnzipInput::Urls(urls) => Downloader::new(urls)
                .with_opts(self.opts.download.clone())
                .start(&child),
        };
        let queue = Arc::new(tokio::sync::Mutex::new(input));

        let filter = match &self.opts.filter {
            Some(pattern) => match glob::Pattern::new(pattern) {
                Ok(compiled) => EntryFilter::Pattern(compiled),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::WARN, event = "intake.unzip.bad_filter", pattern = %pattern, error = %_err, "intake.unzip.bad_filter");
                    EntryFilter::MatchNothing
                }
            },
            None => EntryFilter::All,
        };

        let worker = Arc::new(UnzipWorker {
            opts: self.opts.clone(),
            filter,
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

enum EntryFilter {
    All,
    Pattern(glob::Pattern),
    MatchNothing,
}

impl EntryFilter {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Pattern(pattern) => pattern.matches(name),
            Self::MatchNothing => false,
        }
    }
}

struct UnzipWorker {
    opts: UnzipOpts,
    filter: EntryFilter,
}

impl UnzipWorker {
    async fn run(
        self: Arc<Self>,
        ctrl: Controller,
        abort: AbortSignal,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Downloaded>>>,
        out: mpsc::Sender<Entry>,
    ) {
        'next_file: loop {
            let file = {
                let mut rx = tokio::select! {
                    _ = abort.aborted() => break,
                    guard = queue.lock() => guard,
                };
                tokio::select! {
                    _ = abort.aborted() => break,
                    msg = rx.recv() => msg,
                }
            };
            let Some(file) = file else { break };
            let archive_name = file.path.display().to_string();

            match self.expand(file).await {
                Ok(entries) => {
                    pulse(
                        &self.opts.progress,
                        UnzipProgress {
                            file: archive_name,
                            entries: entries.len(),
                        },
                    );
                    for entry in entries {
                        tokio::select! {
                            _ = abort.aborted() => break 'next_file,
                            sent = out.send(entry) => {
                                if sent.is_err() {
                                    break 'next_file;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::ERROR, event = "intake.unzip.error", file = %archive_name, error = %err, "intake.unzip.error");
                    ctrl.report(err).await;
                    if abort.is_aborted() {
                        break;
                    }
                }
            }
        }
    }

    /// Enumerate one archive and pull out the matching entries.
    async fn expand(self: &Arc<Self>, file: Downloaded) -> Result<Vec<Entry>> {
        let path = file.path.clone();
        // This stage owns the emitted handle; enumeration reopens by path.
        drop(file.file);

        let worker = Arc::clone(self);
        tokio::task::spawn_blocking(move || -> Result<Vec<Entry>> {
            let reader = std::fs::File::open(&path)?;
            let mut archive = zip::ZipArchive::new(reader)?;
            let mut entries = Vec::new();
            for index in 0..archive.len() {
                let mut inner = archive.by_index(index)?;
                if inner.is_dir() {
                    continue;
                }
                let name = inner.name().to_string();
                if !worker.filter.matches(&name) {
                    continue;
                }
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "intake.unzip.entry", name = %name, "intake.unzip.entry");
                let mut data = Vec::with_capacity(inner.size() as usize);
                inner.read_to_end(&mut data)?;
                entries.push(Entry::new(name, data));
            }
            Ok(entries)
        })
        .await
        .map_err(Error::Join)?
    }
}
