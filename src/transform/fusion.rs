//! Loop fusion of two adjacent axes.
//!
//! ```text
//! for i = 0 to 10:              for f = 0 to 200:
//!   for j = 0 to 20:     =>       i = f floordiv 20
//!     body(i, j)                  j = f mod 20
//!                                 body(i, j)
//! ```

use super::{live_axis, Transform};
use crate::affine::{AffineFolder, BoundFolder};
use crate::ir::ValueType;
use crate::schedule::nest::axis_extent;
use crate::schedule::{AxisDerivation, AxisId, AxisKind, AxisTransform, Schedule};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use log::debug;

/// Fuse `outer` with the axis nested directly inside it.
#[derive(Debug, Clone)]
pub struct Fuse {
    pub outer: AxisId,
    pub inner: AxisId,
}

impl Fuse {
    pub fn new(outer: AxisId, inner: AxisId) -> Self {
        Self { outer, inner }
    }

    /// Constant trip count of the inner axis.
    fn inner_extent(&self, schedule: &Schedule) -> StageResult<i64> {
        let outer_extent = axis_extent(schedule, self.outer);
        let inner_extent = axis_extent(schedule, self.inner);
        let inner = schedule.axis_ref(self.inner);
        let stage = schedule.stage_ref(inner.stage).name.clone();
        if AffineFolder.fuse(&outer_extent, &inner_extent).is_none() {
            return Err(ScheduleError::new(
                ScheduleErrorKind::NonConstantExtent,
                self.name(),
                format!("inner axis '{}' has no constant trip count", inner.name),
            )
            .at_stage(stage)
            .into());
        }
        match inner_extent.as_constant() {
            Some(extent) if extent > 0 => Ok(extent),
            _ => Err(ScheduleError::new(
                ScheduleErrorKind::InvalidFactor,
                self.name(),
                format!("inner axis '{}' has no iterations", inner.name),
            )
            .at_stage(stage)
            .into()),
        }
    }
}

impl Transform for Fuse {
    type Output = AxisId;

    fn name(&self) -> &'static str {
        "fuse"
    }

    fn validate(&self, schedule: &Schedule) -> StageResult<()> {
        let outer = live_axis(schedule, self.outer, self.name())?;
        let inner = live_axis(schedule, self.inner, self.name())?;
        let stage = schedule.stage_ref(outer.stage);
        let adjacent = outer.stage == inner.stage
            && matches!(
                (stage.position(self.outer), stage.position(self.inner)),
                (Some(o), Some(i)) if o + 1 == i
            );
        if !adjacent {
            return Err(ScheduleError::new(
                ScheduleErrorKind::NonAdjacentFuse,
                self.name(),
                format!("'{}' is not the loop directly inside '{}'", inner.name, outer.name),
            )
            .at_stage(stage.name.clone())
            .into());
        }
        self.inner_extent(schedule).map(|_| ())
    }

    fn apply(&self, schedule: &mut Schedule) -> StageResult<AxisId> {
        self.validate(schedule)?;
        let inner_extent = self.inner_extent(schedule)?;
        let (stage, name) = {
            let outer = schedule.axis_ref(self.outer);
            let inner = schedule.axis_ref(self.inner);
            (outer.stage, format!("{}.{}.fused", outer.name, inner.name))
        };

        let var = schedule.add_var(name.clone(), ValueType::Int(32));
        let fused = schedule.add_axis(
            stage,
            name.clone(),
            var,
            AxisKind::Fused { outer: self.outer, inner: self.inner, inner_extent },
        );
        for (id, partner, is_outer) in [(self.outer, self.inner, true), (self.inner, self.outer, false)] {
            let axis = schedule.axis_mut(id);
            axis.derived = Some(AxisDerivation::Fused { fused, inner_extent, is_outer });
            axis.log.push(AxisTransform::Fuse { partner, fused });
        }

        let stage = schedule.stage_mut(stage);
        if let Some(pos) = stage.position(self.outer) {
            stage.leaf_axes[pos] = fused;
            stage.leaf_axes.remove(pos + 1);
        }
        debug!("fused into '{}' of stage '{}'", name, stage.name);
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::frontend::{create_schedule, placeholder};

    fn nest() -> Schedule {
        create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[10, 20])], |kb, ts| {
            let a = ts[0].clone();
            let i = kb.for_(0, 10, 1, Some("S"))?;
            let j = kb.for_range(0, 20)?;
            kb.store(&a, &[i, j], 0)?;
            kb.end()?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap()
    }

    #[test]
    fn test_fuse_extent() {
        let mut s = nest();
        let (i, j) = {
            let st = s.stage("S").unwrap();
            (st.axis(0).unwrap(), st.axis(1).unwrap())
        };
        let f = s.fuse(i, j).unwrap();
        assert_eq!(s.stage("S").unwrap().axes(), &[f]);
        assert_eq!(axis_extent(&s, f).as_constant(), Some(200));
        assert_eq!(s.axis(f).unwrap().name(), "i0.i1.fused");
    }

    #[test]
    fn test_fuse_wrong_order() {
        let mut s = nest();
        let (i, j) = {
            let st = s.stage("S").unwrap();
            (st.axis(0).unwrap(), st.axis(1).unwrap())
        };
        let err = s.fuse(j, i).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::NonAdjacentFuse));
    }

    #[test]
    fn test_fuse_split_inner_is_rejected() {
        let mut s = nest();
        let i = s.stage("S").unwrap().axis(0).unwrap();
        let (outer, inner) = s.split(i, 3).unwrap();
        let err = s.fuse(outer, inner).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::NonConstantExtent));
    }
}
