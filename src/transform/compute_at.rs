//! Stage relocation.
//!
//! `compute_at(P, C, axis)` removes stage `P` from its place in the kernel and
//! runs it inside the loop of `axis` in stage `C`, once per iteration of the
//! loops enclosing it. The relocation is only recorded here; lowering splices
//! the producer's nest and elides the producer loops the consumer already
//! iterates over.
//!
//! A producer that is not a `compute` stage is re-run in full on every
//! iteration of the target loop, so it must not read what it writes.

use super::{live_axis, Transform};
use crate::analysis::dataflow::{self, Dataflow, EdgeKind};
use crate::schedule::{AxisId, AxisTransform, Relocation, Schedule, StageId, StageKind};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use log::debug;

#[derive(Debug, Clone)]
pub struct ComputeAt {
    pub producer: StageId,
    pub consumer: StageId,
    pub axis: AxisId,
}

impl ComputeAt {
    pub fn new(producer: StageId, consumer: StageId, axis: AxisId) -> Self {
        Self { producer, consumer, axis }
    }

    fn error(&self, kind: ScheduleErrorKind, stage: &str, message: String) -> crate::utils::errors::StageError {
        ScheduleError::new(kind, self.name(), message).at_stage(stage).into()
    }

    /// Whether `stage` runs as part of the consumer: the consumer itself or a
    /// stage relocated into it, directly or transitively.
    fn runs_in_consumer(&self, schedule: &Schedule, stage: StageId) -> bool {
        let mut current = stage;
        for _ in 0..=schedule.stages.len() {
            if current == self.consumer {
                return true;
            }
            match schedule.relocation(current) {
                Some(reloc) => current = reloc.consumer,
                None => return false,
            }
        }
        false
    }
}

impl Transform for ComputeAt {
    type Output = ();

    fn name(&self) -> &'static str {
        "compute_at"
    }

    fn validate(&self, schedule: &Schedule) -> StageResult<()> {
        let producer = schedule.stage_by_id(self.producer)?;
        let consumer = schedule.stage_by_id(self.consumer)?;
        let name = producer.name();

        if self.producer == self.consumer {
            return Err(self.error(
                ScheduleErrorKind::InvalidRelocation,
                name,
                "a stage cannot be computed inside itself".to_string(),
            ));
        }
        if let Some(existing) = schedule.relocation(self.producer) {
            return Err(self.error(
                ScheduleErrorKind::AlreadyRelocated,
                name,
                format!("already computed at stage '{}'", schedule.stage_ref(existing.consumer).name()),
            ));
        }
        if !schedule.is_top_level(self.producer) {
            return Err(self.error(
                ScheduleErrorKind::InvalidRelocation,
                name,
                "only stages placed directly in the kernel body can be relocated".to_string(),
            ));
        }

        let axis = live_axis(schedule, self.axis, self.name())?;
        if axis.stage != self.consumer {
            return Err(self.error(
                ScheduleErrorKind::UnknownAxis,
                consumer.name(),
                format!("axis '{}' is not an axis of stage '{}'", axis.name, consumer.name()),
            ));
        }

        let order = schedule.stage_order();
        let position = |id: StageId| order.iter().position(|&s| s == id);
        if position(self.consumer) <= position(self.producer) {
            return Err(self.error(
                ScheduleErrorKind::InvalidRelocation,
                name,
                format!("consumer '{}' is declared before the producer", consumer.name()),
            ));
        }

        let outputs = schedule.stage_outputs(self.producer);
        if !matches!(producer.kind(), StageKind::Compute { .. }) {
            let reads = schedule.stage_reads(self.producer);
            if let Some(&tensor) = outputs.intersection(&reads).next() {
                return Err(self.error(
                    ScheduleErrorKind::InvalidRelocation,
                    name,
                    format!(
                        "it reads and updates '{}', so running it once per iteration of '{}' changes the result",
                        schedule.tensor(tensor).map(|t| t.name.as_str()).unwrap_or("?"),
                        axis.name
                    ),
                ));
            }
        }

        let nested = schedule.stage_tree(self.producer);
        let inside = |id: StageId| nested.contains(&id) || self.runs_in_consumer(schedule, id);
        if dataflow::read_outside(schedule, &outputs, &inside) {
            return Err(self.error(
                ScheduleErrorKind::InvalidRelocation,
                name,
                format!("its outputs are used outside of stage '{}'", consumer.name()),
            ));
        }

        let mut df = Dataflow::analyze(schedule);
        df.add_edge(self.producer, self.consumer, EdgeKind::Relocation);
        dataflow::check_acyclic(schedule, &df, self.name())
    }

    fn apply(&self, schedule: &mut Schedule) -> StageResult<()> {
        self.validate(schedule)?;
        schedule.relocations.insert(self.producer, Relocation { consumer: self.consumer, axis: self.axis });
        let axis = schedule.axis_mut(self.axis);
        axis.log.push(AxisTransform::ComputeAt { producer: self.producer });
        debug!(
            "compute '{}' at '{}'.{}",
            schedule.stage_ref(self.producer).name(),
            schedule.stage_ref(self.consumer).name(),
            schedule.axis_ref(self.axis).name()
        );
        Ok(())
    }
}
