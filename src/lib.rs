//! # intake
//!
//! **Streaming data-ingestion pipelines in Rust.**
//!
//! `intake` is a toolkit for pipelines that pull source files off the
//! network, expand archives, decode records out of tabular or
//! tree-structured formats, and hand them to a sink such as a bulk writer
//! into a search index.
//!
//! It is built for production constraints:
//!
//! - bounded memory, bounded queues, real back-pressure
//! - prompt cancellation, even mid-download
//! - per-stage worker pools
//! - first-error-wins failure reporting
//!
//! ---
//!
//! ## Core Model
//!
//! A pipeline is a chain of stages connected by bounded Tokio channels:
//!
//! ```text
//! Download → Unzip → Decode → Sink
//! ```
//!
//! Every stage runs its own worker pool under a child of the run's
//! [`Controller`]. The controller counts workers, multiplexes their errors
//! upward, and fans cancellation down; a stage's output queue closes when
//! the last of its workers exits. Any stage can be skipped or composed
//! directly over a queue you already own.
//!
//! ---
//!
//! ## Example
//!
//! Download a zip archive, decode the CSV entries inside it, and collect
//! the typed records:
//!
//! ```no_run
//! use intake::control::Controller;
//! use intake::decode::csv::{CsvDecoder, CsvField, CsvRecord};
//! use intake::unzip::Unzipper;
//!
//! #[derive(Default)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! impl CsvRecord for Person {
//!     fn fields() -> Vec<CsvField<Self>> {
//!         vec![
//!             CsvField::string("name", |rec: &mut Self, v| rec.name = v),
//!             CsvField::i32("age", |rec: &mut Self, v| rec.age = v),
//!         ]
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> intake::error::Result<()> {
//!     let ctrl = Controller::new();
//!
//!     let entries = Unzipper::from_urls(["https://example.com/people.zip"])
//!         .filter("*.csv")
//!         .start(&ctrl);
//!
//!     let people = CsvDecoder::<Person>::new(entries).collect(&ctrl).await?;
//!     println!("decoded {} records", people.len());
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Error Contract
//!
//! Workers publish failures on their controller; [`Controller::error`]
//! surfaces exactly the first one and closes the abort signal so every
//! stage unwinds. Record-level trouble (a malformed row, a cell that will
//! not coerce) is logged and skipped by default; set `abort_on_error` on a
//! decoder to make it fatal instead.
//!
//! ---
//!
//! ## Cancellation
//!
//! Every blocking operation in a worker selects against the controller's
//! abort signal, and long copies are chunked so the signal is observed
//! between blocks. `ctrl.abort().await` stops the run and waits for every
//! worker to unwind.
//!
//! ---
//!
//! ## Feature Flags
//!
//! - `tracing` *(default)*: structured spans/events via the `tracing`
//!   crate.
//! - `http` *(default)*: the `reqwest`-backed HTTP transport.
//!
//! [`Controller`]: control::Controller
//! [`Controller::error`]: control::Controller::error

pub mod control;
pub mod convert;
pub mod decode;
pub mod download;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod sink;
pub mod stream;
pub mod unzip;

pub mod prelude {
    //! Convenient imports for most `intake` users.

    pub use crate::control::{AbortSignal, Controller, DependencyGroup};
    pub use crate::decode::csv::{CsvDecoder, CsvField, CsvRecord};
    pub use crate::decode::json::JsonDecoder;
    pub use crate::decode::xml::XmlDecoder;
    pub use crate::download::Downloader;
    pub use crate::entry::Entry;
    pub use crate::error::{Error, Result};
    pub use crate::queue::collect;
    pub use crate::sink::{BulkTarget, BulkWritable, BulkWriter};
    pub use crate::stream::Streamer;
    pub use crate::unzip::Unzipper;
}
