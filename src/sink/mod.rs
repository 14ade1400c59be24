//! Terminal stages that deliver records somewhere else.

mod bulk;

pub use bulk::{BulkAction, BulkFailure, BulkOpts, BulkTarget, BulkWritable, BulkWriter, FlushReport};
