//! Loop-nest planning for a stage.
//!
//! Given a stage's current axis order, computes for every loop its bounds, and
//! after every loop header the variable bindings and guards that become
//! computable there. Root variables of transformed axes are recovered from the
//! leaf loops:
//!
//! ```text
//! split(p, f) -> (o, i):  p = o * f + i
//! fuse(a, b) -> f:        a = f floordiv len(b),  b = f mod len(b)
//! root r = lo + step * p
//! ```

use super::stage::{AxisDerivation, AxisId, AxisKind, StageId};
use super::Schedule;
use crate::affine::{AffineFolder, BoundFolder, IndexExpr};
use crate::ir::VarId;
use crate::utils::errors::{LoweringError, LoweringErrorKind, ScheduleError, ScheduleErrorKind, StageResult};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeSet, HashMap};

/// Emitted after a loop header, in order. A guard encloses everything after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NestItem {
    Bind { var: VarId, value: IndexExpr },
    Guard { lhs: IndexExpr, upper: IndexExpr },
}

/// One loop of a planned nest.
#[derive(Debug, Clone, PartialEq)]
pub struct NestLevel {
    pub axis: AxisId,
    pub var: VarId,
    pub lower: IndexExpr,
    pub upper: IndexExpr,
    pub step: i64,
    pub unroll: Option<i64>,
    pub items: Vec<NestItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestPlan {
    /// Items that need no loop of the stage
    pub prologue: Vec<NestItem>,
    pub levels: Vec<NestLevel>,
}

struct Planner<'a, F: BoundFolder> {
    schedule: &'a Schedule,
    folder: F,
}

impl<'a, F: BoundFolder> Planner<'a, F> {
    /// Exact number of iterations of an axis, in terms of enclosing values.
    fn extent(&self, id: AxisId) -> IndexExpr {
        let axis = self.schedule.axis_ref(id);
        match &axis.kind {
            AxisKind::Root { lo, hi, step } => {
                self.folder.trip_count(&lo.clone().into(), &hi.clone().into(), *step)
            }
            AxisKind::SplitOuter { parent, factor } => {
                self.folder.split(&self.extent(*parent), *factor, &IndexExpr::constant(0)).0
            }
            AxisKind::SplitInner { parent, factor } => {
                let outer = match self.schedule.axis_ref(*parent).derived {
                    Some(AxisDerivation::Split { outer, .. }) => self.ordinal(outer),
                    _ => IndexExpr::constant(0),
                };
                self.folder.split(&self.extent(*parent), *factor, &outer).1
            }
            AxisKind::Fused { outer, inner_extent, .. } => self.extent(*outer).mul(*inner_extent),
        }
    }

    /// Zero-based iteration number of an axis, in terms of leaf variables.
    fn ordinal(&self, id: AxisId) -> IndexExpr {
        let axis = self.schedule.axis_ref(id);
        match axis.derived {
            None => IndexExpr::var(axis.var),
            Some(AxisDerivation::Split { outer, inner, factor }) => {
                self.ordinal(outer).mul(factor).add(self.ordinal(inner))
            }
            Some(AxisDerivation::Fused { fused, inner_extent, is_outer: true }) => {
                self.ordinal(fused).floordiv(inner_extent)
            }
            Some(AxisDerivation::Fused { fused, inner_extent, is_outer: false }) => {
                self.ordinal(fused).modulo(inner_extent)
            }
        }
    }

    fn plan(&self, stage_id: StageId, order: &[AxisId], elided: &HashMap<AxisId, VarId>) -> StageResult<NestPlan> {
        let stage = self.schedule.stage_ref(stage_id);
        let owned: BTreeSet<VarId> = self
            .schedule
            .axes
            .iter()
            .filter(|a| a.stage == stage_id)
            .map(|a| a.var)
            .collect();
        let mut state = PlanState { owned, bound: BTreeSet::new(), binds: Vec::new(), guards: Vec::new() };

        for &root in &stage.root_axes {
            let axis = self.schedule.axis_ref(root);
            if let AxisKind::Root { lo, step, .. } = &axis.kind {
                if axis.derived.is_some() {
                    let value = IndexExpr::from(lo.clone()).add(self.ordinal(root).mul(*step));
                    state.binds.push((axis.var, value));
                }
            }
        }

        let mut plan = NestPlan::default();
        for &root in &stage.root_axes {
            if let Some(&outer) = elided.get(&root) {
                let var = self.schedule.axis_ref(root).var;
                plan.prologue.push(NestItem::Bind { var, value: IndexExpr::var(outer) });
                state.bound.insert(var);
            }
        }
        plan.prologue.extend(state.drain_ready());

        for &id in order.iter().filter(|id| !elided.contains_key(id)) {
            let axis = self.schedule.axis_ref(id);
            let (lower, upper, step) = match &axis.kind {
                AxisKind::Root { lo, hi, step } => (lo.clone().into(), hi.clone().into(), *step),
                AxisKind::SplitInner { parent, factor } => {
                    let exact = self.extent(id);
                    if state.ready(&exact) {
                        (IndexExpr::constant(0), exact, 1)
                    } else {
                        // Outer loop is not enclosing: iterate the full factor and
                        // filter the overhang once both loops are bound.
                        state.guards.push((self.ordinal(*parent), self.extent(*parent)));
                        (IndexExpr::constant(0), IndexExpr::constant(*factor), 1)
                    }
                }
                _ => (IndexExpr::constant(0), self.extent(id), 1),
            };
            for bound in [&lower, &upper] {
                if let Some(var) = state.first_unbound(bound) {
                    return Err(ScheduleError::new(
                        ScheduleErrorKind::BoundDependsOnInnerAxis,
                        "loop nest",
                        format!(
                            "bound of axis '{}' depends on '{}', which is not bound by an enclosing loop",
                            axis.name,
                            self.schedule.var_name(var)
                        ),
                    )
                    .at_stage(stage.name.clone())
                    .into());
                }
            }
            state.bound.insert(axis.var);
            let items = state.drain_ready();
            plan.levels.push(NestLevel { axis: id, var: axis.var, lower, upper, step, unroll: axis.unroll, items });
        }

        if !state.binds.is_empty() || !state.guards.is_empty() {
            return Err(LoweringError::new(
                LoweringErrorKind::Inconsistent,
                format!("stage '{}' leaves root variables unbound by its loops", stage.name),
            )
            .into());
        }
        Ok(plan)
    }
}

struct PlanState {
    owned: BTreeSet<VarId>,
    bound: BTreeSet<VarId>,
    binds: Vec<(VarId, IndexExpr)>,
    guards: Vec<(IndexExpr, IndexExpr)>,
}

impl PlanState {
    fn first_unbound(&self, expr: &IndexExpr) -> Option<VarId> {
        expr.vars().into_iter().find(|v| self.owned.contains(v) && !self.bound.contains(v))
    }

    fn ready(&self, expr: &IndexExpr) -> bool {
        self.first_unbound(expr).is_none()
    }

    /// Emit every bind and guard whose operands are now bound.
    fn drain_ready(&mut self) -> Vec<NestItem> {
        let mut items = Vec::new();
        loop {
            let mut progress = false;
            let mut i = 0;
            while i < self.binds.len() {
                if self.ready(&self.binds[i].1) {
                    let (var, value) = self.binds.remove(i);
                    self.bound.insert(var);
                    items.push(NestItem::Bind { var, value });
                    progress = true;
                } else {
                    i += 1;
                }
            }
            let mut i = 0;
            while i < self.guards.len() {
                let (lhs, upper) = &self.guards[i];
                if self.ready(lhs) && self.ready(upper) {
                    let (lhs, upper) = self.guards.remove(i);
                    items.push(NestItem::Guard { lhs, upper });
                    progress = true;
                } else {
                    i += 1;
                }
            }
            if !progress {
                return items;
            }
        }
    }
}

/// Plan the loop nest of `stage` with axes in `order`. Root axes in `elided`
/// get no loop and are bound to the given outer variable instead.
pub fn plan(
    schedule: &Schedule,
    stage: StageId,
    order: &[AxisId],
    elided: &HashMap<AxisId, VarId>,
) -> StageResult<NestPlan> {
    Planner { schedule, folder: AffineFolder }.plan(stage, order, elided)
}

/// Exact extent of an axis.
pub fn axis_extent(schedule: &Schedule, axis: AxisId) -> IndexExpr {
    Planner { schedule, folder: AffineFolder }.extent(axis)
}
