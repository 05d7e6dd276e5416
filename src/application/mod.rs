//! Application layer: drives reconcile ticks for many resources.

pub mod driver;

pub use driver::{NextRun, ReconcileDriver, TickOutcome};
