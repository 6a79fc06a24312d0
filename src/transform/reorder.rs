//! Loop reordering.
//!
//! The listed axes are permuted among the positions they currently occupy;
//! axes not listed keep their position. `reorder(j, i)` on `(i, j, k)` yields
//! `(j, i, k)`.

use super::{live_axis, Transform};
use crate::schedule::nest;
use crate::schedule::{AxisId, AxisTransform, Schedule, StageId};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Reorder {
    pub axes: Vec<AxisId>,
}

impl Reorder {
    pub fn new(axes: Vec<AxisId>) -> Self {
        Self { axes }
    }

    /// The stage's axis list after reordering.
    fn new_order(&self, schedule: &Schedule) -> StageResult<(StageId, Vec<AxisId>)> {
        let first = match self.axes.first() {
            Some(&axis) => live_axis(schedule, axis, self.name())?,
            None => {
                return Err(ScheduleError::new(ScheduleErrorKind::UnknownAxis, self.name(), "no axes given").into())
            }
        };
        let stage_id = first.stage;
        let stage = schedule.stage_ref(stage_id);
        let mut seen = HashSet::new();
        let mut positions = Vec::with_capacity(self.axes.len());
        for &id in &self.axes {
            let axis = live_axis(schedule, id, self.name())?;
            if axis.stage != stage_id {
                return Err(ScheduleError::new(
                    ScheduleErrorKind::UnknownAxis,
                    self.name(),
                    format!("axis '{}' does not belong to this stage", axis.name),
                )
                .at_stage(stage.name.clone())
                .into());
            }
            if !seen.insert(id) {
                return Err(ScheduleError::new(
                    ScheduleErrorKind::DuplicateAxis,
                    self.name(),
                    format!("axis '{}' is listed twice", axis.name),
                )
                .at_stage(stage.name.clone())
                .into());
            }
            if let Some(pos) = stage.position(id) {
                positions.push(pos);
            }
        }
        positions.sort_unstable();
        let mut order = stage.leaf_axes.clone();
        for (&pos, &id) in positions.iter().zip(&self.axes) {
            order[pos] = id;
        }
        Ok((stage_id, order))
    }
}

impl Transform for Reorder {
    type Output = ();

    fn name(&self) -> &'static str {
        "reorder"
    }

    fn validate(&self, schedule: &Schedule) -> StageResult<()> {
        let (stage, order) = self.new_order(schedule)?;
        // Loop bounds may only use variables of enclosing loops.
        nest::plan(schedule, stage, &order, &HashMap::new()).map(|_| ())
    }

    fn apply(&self, schedule: &mut Schedule) -> StageResult<()> {
        self.validate(schedule)?;
        let (stage_id, order) = self.new_order(schedule)?;
        for (pos, &id) in order.iter().enumerate() {
            if self.axes.contains(&id) {
                schedule.axis_mut(id).log.push(AxisTransform::Reorder { position: pos });
            }
        }
        let stage = schedule.stage_mut(stage_id);
        stage.leaf_axes = order;
        debug!("reordered stage '{}' to {:?}", stage.name, stage.leaf_axes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::frontend::{create_schedule, placeholder};

    fn triangle() -> Schedule {
        create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[8, 8])], |kb, ts| {
            let a = ts[0].clone();
            let i = kb.for_(0, 8, 1, Some("T"))?;
            let j = kb.for_range(0, i.clone())?;
            kb.store(&a, &[i, j], 1)?;
            kb.end()?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap()
    }

    #[test]
    fn test_reorder_swaps() {
        let mut s = create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[4, 5, 6])], |kb, ts| {
            let a = ts[0].clone();
            let i = kb.for_(0, 4, 1, Some("S"))?;
            let j = kb.for_range(0, 5)?;
            let k = kb.for_range(0, 6)?;
            kb.store(&a, &[i, j, k], 1)?;
            kb.end()?;
            kb.end()?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap();
        let axes = s.stage("S").unwrap().axes().to_vec();
        s.reorder(&[axes[2], axes[0]]).unwrap();
        assert_eq!(s.stage("S").unwrap().axes(), &[axes[2], axes[1], axes[0]]);
        assert_eq!(s.axis(axes[0]).unwrap().log(), &[AxisTransform::Reorder { position: 2 }]);
    }

    #[test]
    fn test_reorder_duplicate() {
        let mut s = triangle();
        let i = s.stage("T").unwrap().axis(0).unwrap();
        let err = s.reorder(&[i, i]).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::DuplicateAxis));
    }

    #[test]
    fn test_reorder_dependent_bound() {
        let mut s = triangle();
        let axes = s.stage("T").unwrap().axes().to_vec();
        let err = s.reorder(&[axes[1], axes[0]]).unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::BoundDependsOnInnerAxis));
        assert_eq!(s.stage("T").unwrap().axes(), &axes[..]);
    }
}
