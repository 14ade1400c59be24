use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::control::{AbortSignal, Controller};
use crate::decode::{tolerate, RecordSink};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::queue::{self, DEFAULT_QUEUE_CAPACITY};

/// Options for a [`JsonDecoder`].
#[derive(Clone)]
pub struct JsonOpts {
    /// Dot-separated path to the records. Empty components are skipped, a
    /// literal component matches the next object key, and `*` enters the
    /// next array.
    pub selection: String,
    pub num_workers: usize,
    pub abort_on_error: bool,
    /// Optional pulse per emitted record.
    pub progress: Option<mpsc::Sender<()>>,
    /// Capacity of the owned output queue.
    pub buffer: usize,
}

impl Default for JsonOpts {
    fn default() -> Self {
        Self {
            selection: String::new(),
            num_workers: 1,
            abort_on_error: false,
            progress: None,
            buffer: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Worker pool decoding records nested inside JSON documents.
///
/// Navigation is token-level: the document is scanned forward to the
/// selection without materializing anything, then each sibling value is
/// sliced out and deserialized on its own, one record at a time. A
/// selection that never matches yields zero records.
pub struct JsonDecoder<R> {
    input: mpsc::Receiver<Entry>,
    opts: JsonOpts,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned + Send + 'static> JsonDecoder<R> {
    pub fn new(input: mpsc::Receiver<Entry>) -> Self {
        Self {
            input,
            opts: JsonOpts::default(),
            _marker: PhantomData,
        }
    }

    /// Decode a single in-memory document.
    pub fn from_entry(entry: Entry) -> Self {
        Self::new(Entry::queue([entry]))
    }

    pub fn with_opts(mut self, opts: JsonOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Set the selection path, e.g. `"outer.items"` or `"outer.*"`.
    pub fn select(mut self, selection: impl Into<String>) -> Self {
        self.opts.selection = selection.into();
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

    /// Start decoding into an owned queue. The queue closes once every
    /// worker has exited.
    pub fn start(self, ctrl: &Controller) -> mpsc::Receiver<R> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx);
        rx
    }

    /// Start decoding into a caller-supplied queue, which the caller keeps
    /// ownership of.
    pub fn start_into(self, ctrl: &Controller, out: mpsc::Sender<R>) {
        let child = ctrl.child();

        let worker = Arc::new(JsonWorker::<R> {
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
    }

    /// Run to completion and return every decoded record, or the run's
    /// first error.
    pub async fn collect(self, ctrl: &Controller) -> Result<Vec<R>> {
        let rx = self.start(ctrl);
        queue::collect(rx, ctrl).await
    }
}

struct JsonWorker<R> {
    opts: JsonOpts,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned + Send + 'static> JsonWorker<R> {
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
        let mut cursor = JsonCursor::new(entry.data.as_ref());

        match navigate(&mut cursor, &self.opts.selection) {
            // The selection never matched: a document without the records
            // is simply empty, not an error.
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(err) => {
                tolerate("decode-json", &entry.name, self.opts.abort_on_error, err)?;
                return Ok(());
            }
        }

        // A literal path can stop on a key whose value is the record array;
        // step inside it so siblings are the array's elements.
        if cursor.peek() == Some(b'[') {
            cursor.bump();
        }

        loop {
            if sink.abort.is_aborted() {
                return Ok(());
            }
            match cursor.peek() {
                None | Some(b']') | Some(b'}') => return Ok(()),
                Some(_) => {}
            }
            let offset = cursor.pos();
            let raw = match cursor.capture_value() {
                Ok(raw) => raw,
                Err(err) => {
                    // The cursor cannot advance past a malformed value, so
                    // this entry ends here either way.
                    tolerate("decode-json", &entry.name, self.opts.abort_on_error, err)?;
                    return Ok(());
                }
            };
            match serde_json::from_slice::<R>(raw) {
                Ok(rec) => {
                    if !sink.emit(rec).await {
                        return Ok(());
                    }
                }
                Err(err) => {
                    tolerate(
                        "decode-json",
                        &entry.name,
                        self.opts.abort_on_error,
                        classify_json_error(err, offset),
                    )?;
                }
            }
        }
    }
}

fn classify_json_error(err: serde_json::Error, offset: usize) -> Error {
    if err.is_data() {
        Error::decode(format!("json value at byte {offset}: {err}"))
    } else {
        Error::parse(format!("json value at byte {offset}: {err}"))
    }
}

/// Walk the cursor forward until the selection path is exhausted.
///
/// Returns `Ok(false)` when the document ends before the path matches.
fn navigate(cursor: &mut JsonCursor<'_>, selection: &str) -> Result<bool> {
    for component in selection.split('.') {
        if component.is_empty() {
            continue;
        }
        if component == "*" {
            loop {
                match cursor.next_token()? {
                    None => return Ok(false),
                    Some(JsonToken::BeginArray) => break,
                    Some(_) => continue,
                }
            }
        } else {
            loop {
                match cursor.next_token()? {
                    None => return Ok(false),
                    Some(JsonToken::Str(s)) if s == component => break,
                    Some(_) => continue,
                }
            }
        }
    }
    Ok(true)
}

enum JsonToken<'a> {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    Str(Cow<'a, str>),
    Scalar,
}

/// A forward-only token scanner over one JSON document.
struct JsonCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> JsonCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    /// Skip whitespace and structural separators, then peek the next byte.
    fn peek(&mut self) -> Option<u8> {
        self.skip_separators();
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn skip_separators(&mut self) {
        while let Some(&b) = self.buf.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<JsonToken<'a>>> {
        let Some(b) = self.peek() else { return Ok(None) };
        match b {
            b'{' => {
                self.bump();
                Ok(Some(JsonToken::BeginObject))
            }
            b'}' => {
                self.bump();
                Ok(Some(JsonToken::EndObject))
            }
            b'[' => {
                self.bump();
                Ok(Some(JsonToken::BeginArray))
            }
            b']' => {
                self.bump();
                Ok(Some(JsonToken::EndArray))
            }
            b'"' => {
                let raw = self.take_string()?;
                let value = decode_string(raw)?;
                Ok(Some(JsonToken::Str(value)))
            }
            _ => {
                self.take_scalar();
                Ok(Some(JsonToken::Scalar))
            }
        }
    }

    /// Consume one complete value and return its raw bytes.
    fn capture_value(&mut self) -> Result<&'a [u8]> {
        self.skip_separators();
        let start = self.pos;
        let mut depth = 0_usize;
        loop {
            let Some(&b) = self.buf.get(self.pos) else {
                return Err(Error::parse(format!(
                    "unexpected end of json input at byte {}",
                    self.pos
                )));
            };
            match b {
                b'{' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' | b']' => {
                    if depth == 0 {
                        return Err(Error::parse(format!(
                            "unexpected {:?} at byte {}",
                            b as char, self.pos
                        )));
                    }
                    depth -= 1;
                    self.pos += 1;
                }
                b'"' => {
                    self.take_string()?;
                }
                b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' => {
                    self.pos += 1;
                }
                _ => {
                    self.take_scalar();
                }
            }
            if depth == 0 {
                break;
            }
        }
        Ok(&self.buf[start..self.pos])
    }

    /// Consume a string token, returning it with the surrounding quotes.
    fn take_string(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.pos += 1;
        let mut escaped = false;
        loop {
            let Some(&b) = self.buf.get(self.pos) else {
                return Err(Error::parse(format!(
                    "unterminated json string starting at byte {start}"
                )));
            };
            self.pos += 1;
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                break;
            }
        }
        Ok(&self.buf[start..self.pos])
    }

    fn take_scalar(&mut self) {
        while let Some(&b) = self.buf.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' | b']' | b'}' => break,
                _ => self.pos += 1,
            }
        }
    }
}

/// Decode a quoted string token. Escape-free strings borrow from the input.
fn decode_string(raw: &[u8]) -> Result<Cow<'_, str>> {
    let inner = &raw[1..raw.len() - 1];
    if !inner.contains(&b'\\') {
        let s = std::str::from_utf8(inner)
            .map_err(|err| Error::parse(format!("invalid utf-8 in json string: {err}")))?;
        return Ok(Cow::Borrowed(s));
    }
    serde_json::from_slice::<String>(raw)
        .map(Cow::Owned)
        .map_err(|err| Error::parse(format!("invalid json string: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(input: &str) -> JsonCursor<'_> {
        JsonCursor::new(input.as_bytes())
    }

    #[test]
    fn navigation_follows_literal_components() {
        let input = r#"{"a":{"b":[1,2,3]}}"#;
        let mut c = cursor(input);
        assert!(navigate(&mut c, "a.b").expect("navigate"));
        assert_eq!(c.peek(), Some(b'['));
    }

    #[test]
    fn navigation_wildcard_enters_next_array() {
        let input = r#"{"a":{"b":[1,2,3]}}"#;
        let mut c = cursor(input);
        assert!(navigate(&mut c, "a.*").expect("navigate"));
        assert_eq!(c.peek(), Some(b'1'));
    }

    #[test]
    fn navigation_skips_empty_components() {
        let input = r#"{"a":{"b":[1]}}"#;
        let mut c = cursor(input);
        assert!(navigate(&mut c, "..a.b").expect("navigate"));
    }

    #[test]
    fn navigation_reports_unreachable_selection() {
        let input = r#"{"a":1}"#;
        let mut c = cursor(input);
        assert!(!navigate(&mut c, "missing").expect("navigate"));
    }

    #[test]
    fn capture_value_slices_compound_values() {
        let input = r#"[{"k":[1,2],"s":"a]b"},{"k":[]}]"#;
        let mut c = cursor(input);
        c.bump();
        let first = c.capture_value().expect("first value");
        assert_eq!(first, br#"{"k":[1,2],"s":"a]b"}"#);
        let second = c.capture_value().expect("second value");
        assert_eq!(second, br#"{"k":[]}"#);
    }

    #[test]
    fn capture_value_slices_scalars() {
        let mut c = cursor("12.5, true");
        assert_eq!(c.capture_value().expect("number"), b"12.5");
        assert_eq!(c.capture_value().expect("bool"), b"true");
    }

    #[test]
    fn capture_value_rejects_unbalanced_input() {
        let mut c = cursor(r#"{"k":1"#);
        assert!(c.capture_value().is_err());
    }

    #[test]
    fn strings_with_escapes_decode() {
        let mut c = cursor(r#""a\"b""#);
        match c.next_token().expect("token") {
            Some(JsonToken::Str(s)) => assert_eq!(s, "a\"b"),
            _ => panic!("expected a string token"),
        }
    }
}
