//! Schedule primitives.
//!
//! Each primitive is a [`Transform`]: `validate` checks it against the current
//! schedule without changing anything, `apply` validates and then mutates the
//! stage's axis list in place. The convenience methods on [`Schedule`] build
//! and apply one transform each.

pub mod split;
pub mod fusion;
pub mod reorder;
pub mod unrolling;
pub mod compute_at;

pub use split::Split;
pub use fusion::Fuse;
pub use reorder::Reorder;
pub use unrolling::Unroll;
pub use compute_at::ComputeAt;

use crate::schedule::{Axis, AxisId, Schedule, StageId};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};

/// A schedule transformation.
pub trait Transform {
    /// What `apply` returns, such as the axes it created.
    type Output;

    /// Transformation name, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Check that the transformation applies to `schedule`.
    fn validate(&self, schedule: &Schedule) -> StageResult<()>;

    /// Apply the transformation.
    fn apply(&self, schedule: &mut Schedule) -> StageResult<Self::Output>;
}

/// An axis that exists and has not been replaced by a split or fuse.
pub(crate) fn live_axis<'a>(schedule: &'a Schedule, axis: AxisId, transform: &str) -> StageResult<&'a Axis> {
    let found = schedule.axes.get(axis.0 as usize).ok_or_else(|| {
        ScheduleError::new(ScheduleErrorKind::UnknownAxis, transform, format!("no axis #{}", axis.0))
    })?;
    if found.is_consumed() {
        return Err(ScheduleError::new(
            ScheduleErrorKind::ConsumedAxis,
            transform,
            format!("axis '{}' was already replaced by a split or fuse", found.name),
        )
        .at_stage(schedule.stage_ref(found.stage).name.clone())
        .into());
    }
    Ok(found)
}

impl Schedule {
    /// Validate and apply a transformation.
    pub fn apply<T: Transform>(&mut self, transform: T) -> StageResult<T::Output> {
        transform.apply(self)
    }

    /// Split `axis` by `factor`, returning the new (outer, inner) axes.
    pub fn split(&mut self, axis: AxisId, factor: i64) -> StageResult<(AxisId, AxisId)> {
        self.apply(Split::new(axis, factor))
    }

    /// Fuse two adjacent axes, outer first.
    pub fn fuse(&mut self, outer: AxisId, inner: AxisId) -> StageResult<AxisId> {
        self.apply(Fuse::new(outer, inner))
    }

    /// Move the given axes of one stage into the given relative order.
    pub fn reorder(&mut self, axes: &[AxisId]) -> StageResult<()> {
        self.apply(Reorder::new(axes.to_vec()))
    }

    /// Mark an axis for unrolling; factor 0 unrolls fully.
    pub fn unroll(&mut self, axis: AxisId, factor: i64) -> StageResult<()> {
        self.apply(Unroll::new(axis, factor))
    }

    /// Execute `producer` inside the loop `axis` of `consumer`.
    pub fn compute_at(&mut self, producer: StageId, consumer: StageId, axis: AxisId) -> StageResult<()> {
        self.apply(ComputeAt::new(producer, consumer, axis))
    }
}
