//! Loop unrolling annotation.
//!
//! Unrolling does not change the axis list; the factor is recorded on the axis
//! and consumed at lowering, which either keeps it as an `unroll` attribute or
//! expands the loop body (see `LoweringConfig::materialize_unroll`).

use super::{live_axis, Transform};
use crate::schedule::{AxisId, AxisTransform, Schedule};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use log::debug;

#[derive(Debug, Clone)]
pub struct Unroll {
    pub axis: AxisId,
    /// Copies per iteration; 0 unrolls fully
    pub factor: i64,
}

impl Unroll {
    pub fn new(axis: AxisId, factor: i64) -> Self {
        Self { axis, factor }
    }

    /// Unroll completely.
    pub fn full(axis: AxisId) -> Self {
        Self { axis, factor: 0 }
    }
}

impl Transform for Unroll {
    type Output = ();

    fn name(&self) -> &'static str {
        "unroll"
    }

    fn validate(&self, schedule: &Schedule) -> StageResult<()> {
        let axis = live_axis(schedule, self.axis, self.name())?;
        if self.factor < 0 {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidFactor,
                self.name(),
                format!("negative unroll factor {} for axis '{}'", self.factor, axis.name),
            )
            .at_stage(schedule.stage_ref(axis.stage).name.clone())
            .into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule) -> StageResult<()> {
        self.validate(schedule)?;
        let axis = schedule.axis_mut(self.axis);
        axis.unroll = Some(self.factor);
        axis.log.push(AxisTransform::Unroll { factor: self.factor });
        debug!("unroll '{}' by {}", axis.name, self.factor);
        Ok(())
    }
}
