use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord};
use tokio::sync::mpsc;

use crate::control::{AbortSignal, Controller, DependencyGroup};
use crate::decode::{default_workers, tolerate, RecordSink};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::queue::{self, DEFAULT_QUEUE_CAPACITY};

/// Cell types a CSV column can be coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvType {
    Str,
    I8,
    I32,
    U8,
    U16,
    U32,
    F32,
    Date,
}

/// A typed cell value on its way into a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum CsvValue {
    Str(String),
    I8(i8),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Date(NaiveDateTime),
}

/// One bindable column target of a record shape: a header tag, a cell type,
/// and a typed setter.
pub struct CsvField<R> {
    tag: &'static str,
    ty: CsvType,
    set: Arc<dyn Fn(&mut R, CsvValue) + Send + Sync>,
}

impl<R> Clone for CsvField<R> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag,
            ty: self.ty,
            set: Arc::clone(&self.set),
        }
    }
}

macro_rules! field_ctor {
    ($name:ident, $ty:ident, $rust:ty) => {
        pub fn $name(tag: &'static str, set: impl Fn(&mut R, $rust) + Send + Sync + 'static) -> Self {
            Self {
                tag,
                ty: CsvType::$ty,
                set: Arc::new(move |rec, value| {
                    if let CsvValue::$ty(v) = value {
                        set(rec, v);
                    }
                }),
            }
        }
    };
}

impl<R> CsvField<R> {
    field_ctor!(string, Str, String);
    field_ctor!(i8, I8, i8);
    field_ctor!(i32, I32, i32);
    field_ctor!(u8, U8, u8);
    field_ctor!(u16, U16, u16);
    field_ctor!(u32, U32, u32);
    field_ctor!(f32, F32, f32);
    field_ctor!(date, Date, NaiveDateTime);

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn ty(&self) -> CsvType {
        self.ty
    }

    fn assign(&self, rec: &mut R, value: CsvValue) {
        (self.set)(rec, value)
    }
}

/// Flatten an embedded record's columns into the surrounding shape.
///
/// The returned fields carry the child's tags and types but write through
/// the accessor, so nested shapes bind headers exactly like flat ones.
pub fn embed<R, C>(get: impl Fn(&mut R) -> &mut C + Send + Sync + 'static) -> Vec<CsvField<R>>
where
    C: CsvRecord,
{
    let get = Arc::new(get);
    C::fields()
        .into_iter()
        .map(|field| {
            let get = Arc::clone(&get);
            let inner = Arc::clone(&field.set);
            CsvField {
                tag: field.tag,
                ty: field.ty,
                set: Arc::new(move |rec, value| inner(get(rec), value)),
            }
        })
        .collect()
}

/// A record shape decodable from CSV rows.
///
/// `fields` is the shape's column table: every bindable column in
/// depth-first order, nested shapes flattened through [`embed`]. Header
/// cells are matched against the tags case-sensitively.
pub trait CsvRecord: Default + Send + 'static {
    fn fields() -> Vec<CsvField<Self>>
    where
        Self: Sized;

    /// Optional fast-path row decoder. Returning `Some` bypasses the
    /// header-driven field binding entirely.
    fn decode_row(row: &StringRecord) -> Option<Result<Self>>
    where
        Self: Sized,
    {
        let _ = row;
        None
    }
}

/// Options for a [`CsvDecoder`].
#[derive(Clone)]
pub struct CsvOpts {
    pub delimiter: u8,
    /// Trim surrounding whitespace off string cells.
    pub trim_spaces: bool,
    /// Drop a trailing `.0…` suffix off string cells.
    pub trim_trailing_zeros: bool,
    /// Tolerate malformed quoting. The underlying reader is always
    /// quote-aware and recovers from stray quotes, so reads follow the
    /// lenient behavior either way; the flag is kept for configuration
    /// parity.
    pub lazy_quotes: bool,
    /// How many rows to skip before the header row.
    pub header_row_index: usize,
    /// `chrono` format string for date cells.
    pub date_format: String,
    pub num_workers: usize,
    pub abort_on_error: bool,
    /// Optional pulse per emitted record.
    pub progress: Option<mpsc::Sender<()>>,
    /// Capacity of the owned output queue.
    pub buffer: usize,
}

impl Default for CsvOpts {
    fn default() -> Self {
        Self {
            delimiter: b',',
            trim_spaces: true,
            trim_trailing_zeros: false,
            lazy_quotes: false,
            header_row_index: 0,
            date_format: "%m/%d/%Y".to_string(),
            num_workers: default_workers(),
            abort_on_error: false,
            progress: None,
            buffer: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Worker pool decoding CSV entries into typed records.
///
/// Each entry is read once for its header, which is bound to the record
/// shape's column table; every following row is decoded through that
/// binding. Columns with no matching tag are skipped, empty cells leave the
/// field at its default, and a cell that fails coercion drops the whole row
/// as a record-level decode error.
pub struct CsvDecoder<R> {
    input: mpsc::Receiver<Entry>,
    opts: CsvOpts,
    deps: DependencyGroup,
    _marker: PhantomData<fn() -> R>,
}

impl<R: CsvRecord> CsvDecoder<R> {
    pub fn new(input: mpsc::Receiver<Entry>) -> Self {
        Self {
            input,
            opts: CsvOpts::default(),
            deps: DependencyGroup::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_opts(mut self, opts: CsvOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.opts.delimiter = delimiter;
        self
    }

    pub fn trim_spaces(mut self, trim: bool) -> Self {
        self.opts.trim_spaces = trim;
        self
    }

    pub fn trim_trailing_zeros(mut self, trim: bool) -> Self {
        self.opts.trim_trailing_zeros = trim;
        self
    }

    pub fn lazy_quotes(mut self, lazy: bool) -> Self {
        self.opts.lazy_quotes = lazy;
        self
    }

    pub fn header_row_index(mut self, index: usize) -> Self {
        self.opts.header_row_index = index;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.opts.date_format = format.into();
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
    pub async fn start(self, ctrl: &Controller) -> mpsc::Receiver<R> {
        let (tx, rx) = mpsc::channel(self.opts.buffer.max(1));
        self.start_into(ctrl, tx).await;
        rx
    }

    /// Start decoding into a caller-supplied queue, which the caller keeps
    /// ownership of.
    pub async fn start_into(self, ctrl: &Controller, out: mpsc::Sender<R>) {
        let child = ctrl.child();
        self.deps.wait().await;

        // The column table is derived once per run and shared by workers.
        let worker = Arc::new(CsvWorker {
            opts: self.opts.clone(),
            fields: R::fields(),
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
        let rx = self.start(ctrl).await;
        queue::collect(rx, ctrl).await
    }
}

struct CsvWorker<R> {
    opts: CsvOpts,
    fields: Vec<CsvField<R>>,
}

impl<R: CsvRecord> CsvWorker<R> {
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
        // Flexible reading: the field count is enforced against the header
        // below, not against whatever row happens to come first. Quote
        // handling stays enabled; the reader recovers from stray quotes on
        // its own, which is the lenient mode `lazy_quotes` names.
        let mut reader = ReaderBuilder::new()
            .delimiter(self.opts.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(entry.reader());
        let mut rows = reader.records();

        // Reading the header is fatal when it fails: without a binding the
        // reader is undecodable.
        for _ in 0..self.opts.header_row_index {
            match rows.next() {
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(classify_csv_error(err)),
                None => {
                    return Err(Error::parse(format!(
                        "{}: ran out of rows before the header",
                        entry.name
                    )))
                }
            }
        }
        let header = match rows.next() {
            Some(Ok(row)) => row,
            Some(Err(err)) => return Err(classify_csv_error(err)),
            None => return Err(Error::parse(format!("{}: missing header row", entry.name))),
        };
        let binding = bind_header(&header, &self.fields);

        loop {
            if sink.abort.is_aborted() {
                return Ok(());
            }
            let row = match rows.next() {
                None => return Ok(()),
                Some(Ok(row)) => row,
                Some(Err(err)) => {
                    tolerate(
                        "decode-csv",
                        &entry.name,
                        self.opts.abort_on_error,
                        classify_csv_error(err),
                    )?;
                    continue;
                }
            };
            if row.len() != binding.len() {
                tolerate(
                    "decode-csv",
                    &entry.name,
                    self.opts.abort_on_error,
                    Error::parse(format!(
                        "row has {} fields, header has {}",
                        row.len(),
                        binding.len()
                    )),
                )?;
                continue;
            }
            match self.decode_row(&row, &binding) {
                Ok(rec) => {
                    if !sink.emit(rec).await {
                        return Ok(());
                    }
                }
                Err(err) => {
                    tolerate("decode-csv", &entry.name, self.opts.abort_on_error, err)?;
                }
            }
        }
    }

    fn decode_row(&self, row: &StringRecord, binding: &[Option<usize>]) -> Result<R> {
        if let Some(result) = R::decode_row(row) {
            return result.map_err(|err| {
                if err.is_record_level() {
                    err
                } else {
                    Error::decode(err.to_string())
                }
            });
        }

        let mut rec = R::default();
        for (column, cell) in row.iter().enumerate() {
            let Some(slot) = binding.get(column).copied().flatten() else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            let field = &self.fields[slot];
            let value = self.coerce(cell, field.ty())?;
            field.assign(&mut rec, value);
        }
        Ok(rec)
    }

    fn coerce(&self, raw: &str, ty: CsvType) -> Result<CsvValue> {
        match ty {
            CsvType::Str => {
                let trimmed = if self.opts.trim_spaces { raw.trim() } else { raw };
                let mut value = trimmed.to_string();
                if self.opts.trim_trailing_zeros {
                    trim_zero_decimals(&mut value);
                }
                Ok(CsvValue::Str(value))
            }
            CsvType::I8 => raw
                .parse()
                .map(CsvValue::I8)
                .map_err(|_| unparsable("int8", raw)),
            CsvType::I32 => raw
                .parse()
                .map(CsvValue::I32)
                .map_err(|_| unparsable("int32", raw)),
            CsvType::U8 => raw
                .parse()
                .map(CsvValue::U8)
                .map_err(|_| unparsable("uint8", raw)),
            CsvType::U16 => raw
                .parse()
                .map(CsvValue::U16)
                .map_err(|_| unparsable("uint16", raw)),
            CsvType::U32 => raw
                .parse()
                .map(CsvValue::U32)
                .map_err(|_| unparsable("uint32", raw)),
            CsvType::F32 => raw
                .parse()
                .map(CsvValue::F32)
                .map_err(|_| unparsable("float32", raw)),
            CsvType::Date => {
                parse_date(raw, &self.opts.date_format).map(CsvValue::Date)
            }
        }
    }
}

/// Map each header column to at most one slot in the column table. Columns
/// whose trimmed cell matches no tag stay unbound and are skipped at decode
/// time; duplicate header cells each resolve independently.
fn bind_header<R>(header: &StringRecord, fields: &[CsvField<R>]) -> Vec<Option<usize>> {
    header
        .iter()
        .map(|cell| {
            let tag = cell.trim();
            fields.iter().position(|field| field.tag == tag)
        })
        .collect()
}

fn classify_csv_error(err: csv::Error) -> Error {
    let msg = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        _ => Error::Parse(msg),
    }
}

fn unparsable(ty: &str, raw: &str) -> Error {
    Error::decode(format!("cannot parse {raw:?} as {ty}"))
}

fn trim_zero_decimals(value: &mut String) {
    if let Some(dot) = value.rfind('.') {
        if value[dot + 1..].bytes().all(|b| b == b'0') {
            value.truncate(dot);
        }
    }
}

fn parse_date(raw: &str, format: &str) -> Result<NaiveDateTime> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
        return Ok(parsed);
    }
    NaiveDate::parse_from_str(raw, format)
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|_| {
            Error::decode(format!(
                "cannot parse {raw:?} as a date with format {format:?}"
            ))
        })
}
