//! Loop splitting.
//!
//! ```text
//! for i = 0 to 10:            for i.outer = 0 to 4:
//!   body(i)          =>         for i.inner = 0 to min(3, 10 - 3*i.outer):
//!                                 body(3*i.outer + i.inner)
//! ```

use super::{live_axis, Transform};
use crate::ir::ValueType;
use crate::schedule::{AxisDerivation, AxisId, AxisKind, AxisTransform, Schedule};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use log::debug;

/// Replace an axis by an outer axis over the blocks and an inner axis over
/// `factor` iterations, clipped on the last block.
#[derive(Debug, Clone)]
pub struct Split {
    pub axis: AxisId,
    pub factor: i64,
}

impl Split {
    pub fn new(axis: AxisId, factor: i64) -> Self {
        Self { axis, factor }
    }
}

impl Transform for Split {
    type Output = (AxisId, AxisId);

    fn name(&self) -> &'static str {
        "split"
    }

    fn validate(&self, schedule: &Schedule) -> StageResult<()> {
        let axis = live_axis(schedule, self.axis, self.name())?;
        if self.factor < 1 {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidFactor,
                self.name(),
                format!("factor {} for axis '{}' is not positive", self.factor, axis.name),
            )
            .at_stage(schedule.stage_ref(axis.stage).name.clone())
            .into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule) -> StageResult<(AxisId, AxisId)> {
        self.validate(schedule)?;
        let (stage, name) = {
            let axis = schedule.axis_ref(self.axis);
            (axis.stage, axis.name.clone())
        };
        let factor = self.factor;

        let outer_var = schedule.add_var(format!("{}.outer", name), ValueType::Int(32));
        let inner_var = schedule.add_var(format!("{}.inner", name), ValueType::Int(32));
        let outer = schedule.add_axis(
            stage,
            format!("{}.outer", name),
            outer_var,
            AxisKind::SplitOuter { parent: self.axis, factor },
        );
        let inner = schedule.add_axis(
            stage,
            format!("{}.inner", name),
            inner_var,
            AxisKind::SplitInner { parent: self.axis, factor },
        );

        let axis = schedule.axis_mut(self.axis);
        axis.derived = Some(AxisDerivation::Split { outer, inner, factor });
        axis.log.push(AxisTransform::Split { factor, outer, inner });

        let stage = schedule.stage_mut(stage);
        if let Some(pos) = stage.position(self.axis) {
            stage.leaf_axes[pos] = outer;
            stage.leaf_axes.insert(pos + 1, inner);
        }
        debug!("split '{}' of stage '{}' by {}", name, stage.name, factor);
        Ok((outer, inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::frontend::{create_schedule, placeholder};
    use crate::schedule::nest::axis_extent;

    fn single() -> Schedule {
        create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[10])], |kb, ts| {
            let a = ts[0].clone();
            let i = kb.for_(0, 10, 1, Some("S"))?;
            kb.store(&a, &[i], 0)?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap()
    }

    #[test]
    fn test_split_replaces_axis() {
        let mut s = single();
        let axis = s.stage("S").unwrap().axis(0).unwrap();
        let (outer, inner) = s.split(axis, 3).unwrap();
        assert_eq!(s.stage("S").unwrap().axes(), &[outer, inner]);
        assert_eq!(axis_extent(&s, outer).as_constant(), Some(4));
        assert!(s.axis(axis).unwrap().is_consumed());
        assert_eq!(s.axis(outer).unwrap().name(), "i0.outer");
    }

    #[test]
    fn test_split_consumed_axis() {
        let mut s = single();
        let axis = s.stage("S").unwrap().axis(0).unwrap();
        s.split(axis, 3).unwrap();
        let err = s.split(axis, 2).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::ConsumedAxis));
    }

    #[test]
    fn test_split_invalid_factor() {
        let mut s = single();
        let axis = s.stage("S").unwrap().axis(0).unwrap();
        let err = s.split(axis, 0).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::InvalidFactor));
    }
}
