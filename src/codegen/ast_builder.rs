//! Lowering a schedule to the loop-nest IR.
//!
//! The kernel body is walked in program order. Each stage marker expands to the
//! stage's planned loop nest; relocated stages are skipped where they were
//! traced and spliced into their host's loop instead.

use super::ast::{AstFor, AstNode, LoweredKernel};
use super::unroll;
use crate::analysis::dataflow::{describe_cycle, Dataflow};
use crate::config::LoweringConfig;
use crate::ir::{storage_root, BinaryOp, Block, Expr, ExprKind, Stmt, TensorId, ValueType, VarId, VarInfo};
use crate::schedule::nest::{self, NestItem, NestLevel};
use crate::schedule::{AxisId, Schedule, StageId};
use crate::utils::errors::{LoweringError, LoweringErrorKind, StageResult};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

/// Builds the lowered loop nest of one schedule.
pub struct AstBuilder<'a> {
    schedule: &'a Schedule,
    config: &'a LoweringConfig,
    /// Relocated stages by host, in declaration order
    guests: HashMap<StageId, Vec<StageId>>,
    spliced: HashMap<StageId, usize>,
    vars: Vec<VarInfo>,
}

impl<'a> AstBuilder<'a> {
    pub fn new(schedule: &'a Schedule) -> Self {
        let mut guests: HashMap<StageId, Vec<StageId>> = HashMap::new();
        for id in schedule.stage_order() {
            if let Some(reloc) = schedule.relocation(id) {
                guests.entry(reloc.consumer).or_default().push(id);
            }
        }
        Self {
            schedule,
            config: &schedule.config().lowering,
            guests,
            spliced: HashMap::new(),
            vars: schedule.vars().to_vec(),
        }
    }

    pub fn build(mut self) -> StageResult<LoweredKernel> {
        self.check_relocations()?;
        let schedule = self.schedule;
        let body = self.lower_block(schedule.body())?;

        for (&guest, reloc) in schedule.relocations() {
            let count = self.spliced.get(&guest).copied().unwrap_or(0);
            if count != 1 {
                return Err(LoweringError::new(
                    LoweringErrorKind::UnreachableRelocation,
                    format!(
                        "stage '{}' was placed {} times inside stage '{}'",
                        schedule.stage_ref(guest).name(),
                        count,
                        schedule.stage_ref(reloc.consumer).name()
                    ),
                )
                .into());
            }
        }

        info!("lowered kernel '{}' into {} top-level nodes", schedule.name(), body.len());
        Ok(LoweredKernel {
            name: schedule.name().to_string(),
            tensors: schedule.tensors().to_vec(),
            args: schedule.args().to_vec(),
            vars: self.vars,
            body,
        })
    }

    /// Invariants the schedule primitives maintain, checked again.
    fn check_relocations(&self) -> StageResult<()> {
        let schedule = self.schedule;
        if let Some(cycle) = Dataflow::analyze(schedule).find_cycle() {
            return Err(LoweringError::new(
                LoweringErrorKind::Cycle,
                format!("cyclic producer/consumer relation: {}", describe_cycle(schedule, &cycle)),
            )
            .into());
        }
        for (&guest, reloc) in schedule.relocations() {
            let host = schedule.stage_ref(reloc.consumer);
            if host.position(reloc.axis).is_none() {
                return Err(LoweringError::new(
                    LoweringErrorKind::UnreachableRelocation,
                    format!(
                        "stage '{}' is computed at axis '{}', which is no longer a loop of stage '{}'",
                        schedule.stage_ref(guest).name(),
                        schedule.axis_ref(reloc.axis).name(),
                        host.name()
                    ),
                )
                .into());
            }
        }
        Ok(())
    }

    fn lower_block(&mut self, block: &Block) -> StageResult<Vec<AstNode>> {
        let mut nodes = Vec::with_capacity(block.stmts.len());
        for stmt in &block.stmts {
            self.lower_stmt(stmt, &mut nodes)?;
        }
        Ok(nodes)
    }

    fn lower_stmt(&mut self, stmt: &Stmt, out: &mut Vec<AstNode>) -> StageResult<()> {
        match stmt {
            Stmt::Store { tensor, indices, value } => out.push(AstNode::Store {
                tensor: *tensor,
                indices: indices.clone(),
                value: value.clone(),
            }),
            Stmt::BitWrite { target, index, value } => match bit_target(target) {
                Some((tensor, indices, base)) => {
                    let offset = if base == 0 {
                        index.clone()
                    } else {
                        Expr::binary(BinaryOp::Add, index.clone(), Expr::int(base as i64))
                    };
                    out.push(AstNode::StoreBits { tensor, indices, offset, width: 1, value: value.clone() });
                }
                None => debug!("dropping bit write through non-storage expression"),
            },
            Stmt::SliceWrite { target, lo, hi, value } => match bit_target(target) {
                Some((tensor, indices, base)) => out.push(AstNode::StoreBits {
                    tensor,
                    indices,
                    offset: Expr::typed_int((base + lo) as i64, ValueType::Int(32)),
                    width: hi - lo,
                    value: value.clone(),
                }),
                None => debug!("dropping slice write through non-storage expression"),
            },
            Stmt::For(l) => {
                let body = self.lower_block(&l.body)?;
                out.push(AstNode::For(AstFor {
                    var: l.var,
                    lower: l.lo.clone().into(),
                    upper: l.hi.clone().into(),
                    step: l.step,
                    unroll: None,
                    stage: None,
                    body,
                }));
            }
            Stmt::While { cond, body } => {
                let body = self.lower_block(body)?;
                out.push(AstNode::While { cond: cond.clone(), body });
            }
            Stmt::If(chain) => {
                let mut branches = Vec::with_capacity(chain.branches.len());
                for (cond, body) in &chain.branches {
                    branches.push((cond.clone(), self.lower_block(body)?));
                }
                let else_body = match &chain.else_body {
                    Some(body) => Some(self.lower_block(body)?),
                    None => None,
                };
                out.push(AstNode::If { branches, else_body });
            }
            Stmt::Stage(id) => {
                if self.schedule.relocation(*id).is_none() {
                    out.extend(self.lower_stage(*id, &HashMap::new())?);
                }
            }
        }
        Ok(())
    }

    /// The loop nest of one stage, with its guests spliced in.
    fn lower_stage(&mut self, id: StageId, elided: &HashMap<AxisId, VarId>) -> StageResult<Vec<AstNode>> {
        let schedule = self.schedule;
        let stage = schedule.stage_ref(id);
        let plan = nest::plan(schedule, id, stage.axes(), elided)?;
        let guests = self.guests.get(&id).cloned().unwrap_or_default();
        let target_of = |guest: StageId| schedule.relocation(guest).map(|r| r.axis);

        let mut body = self.lower_block(stage.body())?;
        for (depth, level) in plan.levels.iter().enumerate().rev() {
            let mut inner = wrap_items(&level.items, body);
            for &guest in guests.iter().filter(|&&g| target_of(g) == Some(level.axis)) {
                inner = self.splice(guest, id, level.axis, inner)?;
            }
            let label = if depth == 0 { Some(stage.name().to_string()) } else { None };
            body = self.make_loop(level, inner, label);
        }

        let mut nodes = wrap_items(&plan.prologue, body);
        for &guest in guests.iter() {
            if let Some(axis) = target_of(guest).filter(|a| elided.contains_key(a)) {
                nodes = self.splice(guest, id, axis, nodes)?;
            }
        }
        debug!("lowered stage '{}' with {} loops", stage.name(), plan.levels.len());
        Ok(nodes)
    }

    fn make_loop(&mut self, level: &NestLevel, body: Vec<AstNode>, stage: Option<String>) -> Vec<AstNode> {
        let l = AstFor {
            var: level.var,
            lower: level.lower.clone(),
            upper: level.upper.clone(),
            step: level.step,
            unroll: level.unroll,
            stage,
            body,
        };
        if self.config.materialize_unroll {
            if let Some(nodes) = unroll::expand(&l, &mut self.vars) {
                return nodes;
            }
        }
        vec![AstNode::For(l)]
    }

    /// Insert the nest of `guest` into `body`, before the first node reading
    /// its outputs.
    fn splice(&mut self, guest: StageId, host: StageId, axis: AxisId, mut body: Vec<AstNode>) -> StageResult<Vec<AstNode>> {
        let elided = self.elision(guest, host, axis);
        let nodes = self.lower_stage(guest, &elided)?;
        let outputs = self.schedule.stage_outputs(guest);
        let at = body.iter().position(|n| n.reads_any(&outputs)).unwrap_or(0);
        let tail = body.split_off(at);
        body.extend(nodes);
        body.extend(tail);
        *self.spliced.entry(guest).or_default() += 1;
        debug!(
            "spliced stage '{}' into '{}' ({} producer loops elided)",
            self.schedule.stage_ref(guest).name(),
            self.schedule.stage_ref(host).name(),
            elided.len()
        );
        Ok(body)
    }

    /// Producer axes already iterated by the host, mapped to the host variable.
    ///
    /// A prefix of the producer's axes, up to the target position, is elided
    /// when the producer computes a tensor element-wise, both axes are untouched
    /// roots with identical bounds, and every read of the output in the host
    /// indexes that dimension with exactly the host's variable.
    fn elision(&self, producer: StageId, host: StageId, target: AxisId) -> HashMap<AxisId, VarId> {
        let schedule = self.schedule;
        let mut elided = HashMap::new();
        let p = schedule.stage_ref(producer);
        let c = schedule.stage_ref(host);
        let (output, limit) = match (p.output(), c.position(target)) {
            (Some(output), Some(limit)) => (output, limit),
            _ => return elided,
        };

        let outputs: BTreeSet<TensorId> = [output].into_iter().collect();
        let mut others = Vec::new();
        c.body().stages(&mut others);
        others.extend(self.guests.get(&host).into_iter().flatten().filter(|&&g| g != producer));
        let read_elsewhere = others.iter().any(|&s| {
            let mut reads = BTreeSet::new();
            schedule.stage_ref(s).body().reads(&mut reads);
            !reads.is_disjoint(&outputs)
        });
        if read_elsewhere {
            return elided;
        }

        let mut index_lists: Vec<Vec<Expr>> = Vec::new();
        c.body().visit_exprs(&mut |e| {
            if let ExprKind::Load { tensor, indices } = &e.kind {
                if *tensor == output {
                    index_lists.push(indices.clone());
                }
            }
        });

        for k in 0..=limit {
            let (pa, ca) = match (p.axes().get(k), c.axes().get(k)) {
                (Some(&pa), Some(&ca)) => (schedule.axis_ref(pa), schedule.axis_ref(ca)),
                _ => break,
            };
            let aligned = p.root_axes().get(k) == Some(&pa.id())
                && pa.is_untouched_root()
                && ca.is_untouched_root()
                && pa.kind() == ca.kind()
                && index_lists.iter().all(|idx| idx.get(k).and_then(Expr::as_var) == Some(ca.var()));
            if !aligned {
                break;
            }
            elided.insert(pa.id(), ca.var());
        }
        elided
    }
}

/// Emit the binds and guards of a nest level around `inner`.
fn wrap_items(items: &[NestItem], inner: Vec<AstNode>) -> Vec<AstNode> {
    let mut nodes = inner;
    for item in items.iter().rev() {
        match item {
            NestItem::Bind { var, value } => nodes.insert(0, AstNode::Bind { var: *var, value: value.clone() }),
            NestItem::Guard { lhs, upper } => {
                nodes = vec![AstNode::Guard { lhs: lhs.clone(), upper: upper.clone(), body: nodes }];
            }
        }
    }
    nodes
}

/// Storage element and bit offset a bit/slice write lands in.
fn bit_target(target: &Expr) -> Option<(TensorId, Vec<Expr>, u32)> {
    match &target.kind {
        ExprKind::Load { tensor, indices } => Some((*tensor, indices.clone(), 0)),
        ExprKind::GetSlice { value, lo, .. } => {
            storage_root(value)?;
            let (tensor, indices, base) = bit_target(value)?;
            Some((tensor, indices, base + lo))
        }
        _ => None,
    }
}
