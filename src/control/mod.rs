//! Run lifecycle: abort fan-out, worker counting, error multiplexing.

mod abort;
mod controller;
mod deps;

pub use abort::AbortSignal;
pub use controller::{Controller, WorkerGuard};
pub use deps::DependencyGroup;
