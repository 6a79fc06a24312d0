//! Analysis passes over schedules.

pub mod dataflow;

pub use dataflow::{check_acyclic, read_outside, Dataflow, EdgeKind, StageAccess};

use crate::schedule::Schedule;

/// Build the producer/consumer graph of a schedule.
pub fn analyze_dataflow(schedule: &Schedule) -> Dataflow {
    Dataflow::analyze(schedule)
}
