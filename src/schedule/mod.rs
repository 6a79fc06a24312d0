//! Schedules: the stage graph of one kernel.
//!
//! A [`Schedule`] owns every tensor, variable, stage and axis created while
//! tracing a kernel, the traced kernel body, and the relocation table filled by
//! `compute_at`. Transformations mutate it in place (see [`crate::transform`]).

pub mod stage;
pub mod nest;

pub use stage::{Axis, AxisDerivation, AxisId, AxisKind, AxisTransform, Stage, StageId, StageKind};
pub use nest::{NestItem, NestLevel, NestPlan};

use crate::affine::AffineExpr;
use crate::config::BuildConfig;
use crate::ir::{Block, NameTable, Stmt, TensorId, TensorInfo, TensorKind, ValueType, VarId, VarInfo};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use crate::utils::pretty::{braced, PrettyPrint};
use pretty::RcDoc;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Where a relocated stage executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub consumer: StageId,
    pub axis: AxisId,
}

/// Root axis description used when creating a stage.
#[derive(Debug, Clone)]
pub(crate) struct RootAxis {
    pub name: String,
    pub var: VarId,
    pub lo: AffineExpr,
    pub hi: AffineExpr,
    pub step: i64,
}

/// The stage graph of one kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub(crate) name: String,
    pub(crate) config: BuildConfig,
    pub(crate) vars: Vec<VarInfo>,
    pub(crate) tensors: Vec<TensorInfo>,
    pub(crate) stages: Vec<Stage>,
    pub(crate) stage_names: HashMap<String, StageId>,
    pub(crate) axes: Vec<Axis>,
    pub(crate) body: Block,
    pub(crate) args: Vec<TensorId>,
    pub(crate) relocations: BTreeMap<StageId, Relocation>,
}

impl Schedule {
    pub(crate) fn new(name: impl Into<String>, config: BuildConfig) -> Self {
        Self {
            name: name.into(),
            config,
            vars: Vec::new(),
            tensors: Vec::new(),
            stages: Vec::new(),
            stage_names: HashMap::new(),
            axes: Vec::new(),
            body: Block::new(),
            args: Vec::new(),
            relocations: BTreeMap::new(),
        }
    }

    pub(crate) fn add_var(&mut self, name: impl Into<String>, ty: ValueType) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarInfo { name: name.into(), ty });
        id
    }

    pub(crate) fn add_tensor(
        &mut self,
        name: impl Into<String>,
        shape: Vec<i64>,
        dtype: ValueType,
        kind: TensorKind,
    ) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(TensorInfo { id, name: name.into(), shape, dtype, kind });
        id
    }

    /// Id the next stage will receive.
    pub(crate) fn next_stage_id(&self) -> StageId {
        StageId(self.stages.len() as u32)
    }

    pub(crate) fn add_stage(
        &mut self,
        name: impl Into<String>,
        kind: StageKind,
        roots: Vec<RootAxis>,
        body: Block,
    ) -> StageId {
        let id = self.next_stage_id();
        let name = name.into();
        let mut root_axes = Vec::with_capacity(roots.len());
        for root in roots {
            let kind = AxisKind::Root { lo: root.lo, hi: root.hi, step: root.step };
            root_axes.push(self.add_axis(id, root.name, root.var, kind));
        }
        self.stage_names.insert(name.clone(), id);
        self.stages.push(Stage { id, name, kind, leaf_axes: root_axes.clone(), root_axes, body });
        id
    }

    pub(crate) fn add_axis(&mut self, stage: StageId, name: impl Into<String>, var: VarId, kind: AxisKind) -> AxisId {
        let id = AxisId(self.axes.len() as u32);
        self.axes.push(Axis {
            id,
            name: name.into(),
            var,
            stage,
            kind,
            derived: None,
            unroll: None,
            log: Vec::new(),
        });
        id
    }

    pub(crate) fn stage_ref(&self, id: StageId) -> &Stage {
        &self.stages[id.0 as usize]
    }

    pub(crate) fn stage_mut(&mut self, id: StageId) -> &mut Stage {
        &mut self.stages[id.0 as usize]
    }

    pub(crate) fn axis_ref(&self, id: AxisId) -> &Axis {
        &self.axes[id.0 as usize]
    }

    pub(crate) fn axis_mut(&mut self, id: AxisId) -> &mut Axis {
        &mut self.axes[id.0 as usize]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage by the name it was created with.
    pub fn stage(&self, name: &str) -> StageResult<&Stage> {
        self.stage_id(name).map(|id| self.stage_ref(id))
    }

    pub fn stage_id(&self, name: &str) -> StageResult<StageId> {
        self.stage_names.get(name).copied().ok_or_else(|| {
            ScheduleError::new(ScheduleErrorKind::UnknownStage, "stage lookup", format!("no stage named '{}'", name))
                .into()
        })
    }

    pub fn stage_by_id(&self, id: StageId) -> StageResult<&Stage> {
        self.stages.get(id.0 as usize).ok_or_else(|| {
            ScheduleError::new(ScheduleErrorKind::UnknownStage, "stage lookup", format!("no stage {}", id)).into()
        })
    }

    pub fn axis(&self, id: AxisId) -> StageResult<&Axis> {
        self.axes.get(id.0 as usize).ok_or_else(|| {
            ScheduleError::new(ScheduleErrorKind::UnknownAxis, "axis lookup", format!("no axis #{}", id.0)).into()
        })
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorInfo> {
        self.tensors.get(id.0 as usize)
    }

    pub fn tensor_by_name(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Kernel arguments: placeholders, then returned tensors.
    pub fn args(&self) -> &[TensorId] {
        &self.args
    }

    pub fn vars(&self) -> &[VarInfo] {
        &self.vars
    }

    pub fn body(&self) -> &Block {
        &self.body
    }

    pub fn relocation(&self, stage: StageId) -> Option<&Relocation> {
        self.relocations.get(&stage)
    }

    pub fn relocations(&self) -> &BTreeMap<StageId, Relocation> {
        &self.relocations
    }

    /// Stages in program order: each stage precedes the stages nested in its body.
    pub fn stage_order(&self) -> Vec<StageId> {
        let mut order = Vec::new();
        self.collect_order(&self.body, &mut order);
        order
    }

    fn collect_order(&self, block: &Block, order: &mut Vec<StageId>) {
        let mut direct = Vec::new();
        block.stages(&mut direct);
        for id in direct {
            order.push(id);
            self.collect_order(&self.stage_ref(id).body, order);
        }
    }

    /// Whether a stage is placed directly in the kernel body.
    pub fn is_top_level(&self, stage: StageId) -> bool {
        self.body.stmts.iter().any(|s| matches!(s, Stmt::Stage(id) if *id == stage))
    }

    /// Tensors a stage writes: its output, or whatever its body stores to,
    /// including the bodies of stages nested inside it.
    pub fn stage_outputs(&self, stage: StageId) -> BTreeSet<TensorId> {
        let mut out = BTreeSet::new();
        for id in self.stage_tree(stage) {
            self.stage_ref(id).body.writes(&mut out);
        }
        out
    }

    /// Tensors a stage reads, including stages nested inside it.
    pub fn stage_reads(&self, stage: StageId) -> BTreeSet<TensorId> {
        let mut out = BTreeSet::new();
        for id in self.stage_tree(stage) {
            self.stage_ref(id).body.reads(&mut out);
        }
        out
    }

    /// `stage` followed by every stage placed inside its body, transitively.
    pub(crate) fn stage_tree(&self, stage: StageId) -> Vec<StageId> {
        let mut tree = vec![stage];
        let mut next = 0;
        while next < tree.len() {
            let mut nested = Vec::new();
            self.stage_ref(tree[next]).body.stages(&mut nested);
            tree.extend(nested);
            next += 1;
        }
        tree
    }

    fn axis_doc(&self, id: AxisId) -> String {
        let axis = self.axis_ref(id);
        let name = |v: VarId| format!("%{}", self.var_name(v));
        match &axis.kind {
            AxisKind::Root { lo, hi, step } if *step == 1 => {
                format!("%{} = {} to {}", axis.name, lo.to_string_with_names(&name), hi.to_string_with_names(&name))
            }
            AxisKind::Root { lo, hi, step } => format!(
                "%{} = {} to {} step {}",
                axis.name,
                lo.to_string_with_names(&name),
                hi.to_string_with_names(&name),
                step
            ),
            AxisKind::SplitOuter { factor, .. } | AxisKind::SplitInner { factor, .. } => {
                format!("%{} (split {})", axis.name, factor)
            }
            AxisKind::Fused { .. } => format!("%{} (fused)", axis.name),
        }
    }

    fn stage_doc(&self, id: StageId) -> RcDoc<'static> {
        let stage = self.stage_ref(id);
        let axes: Vec<String> = stage.leaf_axes.iter().map(|&a| self.axis_doc(a)).collect();
        let mut header = format!("stage \"{}\" ({})", stage.name, axes.join(", "));
        if let Some(reloc) = self.relocations.get(&id) {
            let target = self.axis_ref(reloc.axis);
            header.push_str(&format!(" at \"{}\".%{}", self.stage_ref(reloc.consumer).name, target.name));
        }
        braced(header, self.block_doc(&stage.body))
    }

    fn block_doc(&self, block: &Block) -> Vec<RcDoc<'static>> {
        block.stmts.iter().map(|s| self.stmt_doc(s)).collect()
    }

    fn stmt_doc(&self, stmt: &Stmt) -> RcDoc<'static> {
        match stmt {
            Stmt::Store { tensor, indices, value } => {
                let target = crate::ir::Expr::load(*tensor, indices.clone(), value.ty.clone());
                RcDoc::text(format!("{} = {}", target.render(self), value.render(self)))
            }
            Stmt::BitWrite { target, index, value } => RcDoc::text(format!(
                "{}[{}] = {}",
                target.render(self),
                index.render(self),
                value.render(self)
            )),
            Stmt::SliceWrite { target, lo, hi, value } => RcDoc::text(format!(
                "{}[{}:{}] = {}",
                target.render(self),
                lo,
                hi,
                value.render(self)
            )),
            Stmt::For(l) => {
                let name = |v: VarId| format!("%{}", self.var_name(v));
                let mut header = format!(
                    "for %{} = {} to {}",
                    self.var_name(l.var),
                    l.lo.to_string_with_names(&name),
                    l.hi.to_string_with_names(&name)
                );
                if l.step != 1 {
                    header.push_str(&format!(" step {}", l.step));
                }
                braced(header, self.block_doc(&l.body))
            }
            Stmt::While { cond, body } => braced(format!("while {}", cond.render(self)), self.block_doc(body)),
            Stmt::If(chain) => {
                let mut doc = RcDoc::nil();
                for (i, (cond, body)) in chain.branches.iter().enumerate() {
                    let head = if i == 0 {
                        format!("if {} {{", cond.render(self))
                    } else {
                        format!("}} elif {} {{", cond.render(self))
                    };
                    if i > 0 {
                        doc = doc.append(RcDoc::hardline());
                    }
                    doc = doc.append(RcDoc::text(head)).append(crate::utils::pretty::indented(self.block_doc(body)));
                }
                if let Some(body) = &chain.else_body {
                    doc = doc
                        .append(RcDoc::hardline())
                        .append(RcDoc::text("} else {"))
                        .append(crate::utils::pretty::indented(self.block_doc(body)));
                }
                doc.append(RcDoc::hardline()).append(RcDoc::text("}"))
            }
            Stmt::Stage(id) => self.stage_doc(*id),
        }
    }

    /// Render the traced IR.
    pub fn pretty_ir(&self) -> String {
        self.pretty()
    }

    pub fn var_name(&self, var: VarId) -> &str {
        self.vars.get(var.0 as usize).map(|v| v.name.as_str()).unwrap_or("?")
    }
}

impl NameTable for Schedule {
    fn var_name(&self, var: VarId) -> String {
        Schedule::var_name(self, var).to_string()
    }

    fn tensor_name(&self, tensor: TensorId) -> String {
        self.tensor(tensor).map(|t| t.name.clone()).unwrap_or_else(|| tensor.to_string())
    }
}

impl PrettyPrint for Schedule {
    fn to_doc(&self) -> RcDoc<'static> {
        let args: Vec<String> = self
            .args
            .iter()
            .filter_map(|&t| self.tensor(t))
            .map(|t| format!("%{}: {}{:?}", t.name, t.dtype, t.shape))
            .collect();
        braced(format!("kernel {}({})", self.name, args.join(", ")), self.block_doc(&self.body))
    }
}
