use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::control::{AbortSignal, Controller, DependencyGroup};
use crate::decode::{tolerate, RecordSink};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::queue::{self, DEFAULT_QUEUE_CAPACITY};

/// Options for an [`XmlDecoder`].
#[derive(Clone)]
pub struct XmlOpts {
    /// Local name of the element that holds one record.
    pub selection: String,
    pub num_workers: usize,
    pub abort_on_error: bool,
    /// Enforce well-formed end tags.
    pub strict: bool,
    /// Custom entities substituted before a record element is decoded.
    pub entities: HashMap<String, String>,
    /// Optional pulse per emitted record.
    pub progress: Option<mpsc::Sender<()>>,
    /// Capacity of the owned output queue.
    pub buffer: usize,
}

impl Default for XmlOpts {
    fn default() -> Self {
        Self {
            selection: String::new(),
            num_workers: 1,
            abort_on_error: false,
            strict: true,
            entities: HashMap::new(),
            progress: None,
            buffer: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Worker pool decoding records out of XML documents.
///
/// The document is walked event by event; every element whose local name
/// equals the selection is captured, descendants included, and deserialized
/// into one record. Everything between record elements is discarded.
pub struct XmlDecoder<R> {
    input: mpsc::Receiver<Entry>,
    opts: XmlOpts,
    deps: DependencyGroup,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned + Send + 'static> XmlDecoder<R> {
    pub fn new(input: mpsc::Receiver<Entry>) -> Self {
        Self {
            input,
            opts: XmlOpts::default(),
            deps: DependencyGroup::new(),
            _marker: PhantomData,
        }
    }

    /// Decode a single in-memory document.
    pub fn from_entry(entry: Entry) -> Self {
        Self::new(Entry::queue([entry]))
    }

    pub fn with_opts(mut self, opts: XmlOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Set the record element's local name.
    pub fn select(mut self, selection: impl Into<String>) -> Self {
        self.opts.selection = selection.into();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.opts.strict = strict;
        self
    }

    pub fn entities(mut self, entities: HashMap<String, String>) -> Self {
        self.opts.entities = entities;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.opts.num_workers = n.max(1);
        self
    }

    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.opts.abort_on_error = abort;
        self
    }

    pub fn report_progress_to(mut self, sink: mpsc::Sender<()>) -> Self {
        self.opts.progress = Some(sink);
        self
    }

    pub fn buffer(mut self, capacity: usize) -> Self {
        self.opts.buffer = capacity.max(1);
        self
    }

    /// Hold off decoding until the given controllers are done.
    pub fn depend_on(mut self, ctrls: impl IntoIterator<Item = Controller>) -> Self {
        self.deps.set(ctrls);
        self
    }

    /// Start decoding into an owned queue. The queue closes once every
    /// worker has exited.
    ///
    /// Fails with a schema error when no selection was configured.
    pub async fn start(self, ctrl: &Controller) -> Result<mpsc::Receiver<R>> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx).await?;
        Ok(rx)
    }

    /// Start decoding into a caller-supplied queue, which the caller keeps
    /// ownership of.
    pub async fn start_into(self, ctrl: &Controller, out: mpsc::Sender<R>) -> Result<()> {
        if self.opts.selection.is_empty() {
            return Err(Error::schema(
                "xml decoder started without a record element selection",
            ));
        }

        let child = ctrl.child();
        self.deps.wait().await;

        let worker = Arc::new(XmlWorker::<R> {
            opts: self.opts.clone(),
            _marker: PhantomData,
        });
        let queue = Arc::new(tokio::sync::Mutex::new(self.input));

        for _ in 0..self.opts.num_workers.max(1) {
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
        Ok(())
    }

    /// Run to completion and return every decoded record, or the run's
    /// first error.
    pub async fn collect(self, ctrl: &Controller) -> Result<Vec<R>> {
        let rx = self.start(ctrl).await?;
        queue::collect(rx, ctrl).await
    }
}

struct XmlWorker<R> {
    opts: XmlOpts,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned + Send + 'static> XmlWorker<R> {
    async fn run(
        &self,
        ctrl: Controller,
        abort: AbortSignal,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Entry>>>,
        out: mpsc::Sender<R>,
    ) {
        let sink = RecordSink {
            out,
            abort: abort.clone(),
            progress: self.opts.progress.clone(),
        };
        loop {
            let entry = {
                let mut rx = tokio::select! {
                    _ = abort.aborted() => break,
                    guard = queue.lock() => guard,
                };
                tokio::select! {
                    _ = abort.aborted() => break,
                    msg = rx.recv() => msg,
                }
            };
            let Some(entry) = entry else { break };

            if let Err(err) = self.decode_entry(&entry, &sink).await {
                ctrl.report(err).await;
                return;
            }
        }
    }

    async fn decode_entry(&self, entry: &Entry, sink: &RecordSink<R>) -> Result<()> {
        let text = match std::str::from_utf8(entry.data.as_ref()) {
            Ok(text) => text,
            Err(err) => {
                tolerate(
                    "decode-xml",
                    &entry.name,
                    self.opts.abort_on_error,
                    Error::parse(format!("xml document is not utf-8: {err}")),
                )?;
                return Ok(());
            }
        };

        let mut reader = Reader::from_str(text);
        reader.check_end_names(self.opts.strict);
        let selection = self.opts.selection.as_bytes();

        loop {
            if sink.abort.is_aborted() {
                return Ok(());
            }
            let element_start = reader.buffer_position();
            let captured = match reader.read_event() {
                Ok(Event::Eof) => return Ok(()),
                Ok(Event::Start(start)) => {
                    if start.name().local_name().as_ref() != selection {
                        continue;
                    }
                    match reader.read_to_end(start.name()) {
                        Ok(_) => &text[element_start..reader.buffer_position()],
                        Err(err) => {
                            // The reader cannot recover its position past a
                            // broken element; give up on this document.
                            tolerate(
                                "decode-xml",
                                &entry.name,
                                self.opts.abort_on_error,
                                Error::parse(format!("xml element: {err}")),
                            )?;
                            return Ok(());
                        }
                    }
                }
                Ok(Event::Empty(empty)) => {
                    if empty.name().local_name().as_ref() != selection {
                        continue;
                    }
                    &text[element_start..reader.buffer_position()]
                }
                Ok(_) => continue,
                Err(err) => {
                    tolerate(
                        "decode-xml",
                        &entry.name,
                        self.opts.abort_on_error,
                        Error::parse(format!("xml document: {err}")),
                    )?;
                    return Ok(());
                }
            };

            let resolved = resolve_entities(captured, &self.opts.entities);
            match quick_xml::de::from_str::<R>(&resolved) {
                Ok(rec) => {
                    if !sink.emit(rec).await {
                        return Ok(());
                    }
                }
                Err(err) => {
                    tolerate(
                        "decode-xml",
                        &entry.name,
                        self.opts.abort_on_error,
                        Error::decode(format!("xml record: {err}")),
                    )?;
                }
            }
        }
    }
}

/// Substitute user-declared entities in a captured element.
fn resolve_entities<'a>(raw: &'a str, entities: &HashMap<String, String>) -> std::borrow::Cow<'a, str> {
    if entities.is_empty() {
        return std::borrow::Cow::Borrowed(raw);
    }
    let mut resolved = raw.to_string();
    for (name, value) in entities {
        resolved = resolved.replace(&format!("&{name};"), value);
    }
    std::borrow::Cow::Owned(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_substitute_only_declared_names() {
        let entities = HashMap::from([("co".to_string(), "Example Corp".to_string())]);
        let resolved = resolve_entities("<rec><name>&co;</name>&amp;</rec>", &entities);
        assert_eq!(resolved, "<rec><name>Example Corp</name>&amp;</rec>");
    }
}
