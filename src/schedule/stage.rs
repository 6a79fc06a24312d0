//! Stages and axes.

use crate::affine::AffineExpr;
use crate::ir::{Block, TensorId, VarId};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use serde::{Serialize, Deserialize};
use std::fmt;

/// Identifier of a stage within its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub u32);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifier of an axis within its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AxisId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageKind {
    /// Tagged loop nest with arbitrary statements
    Imperative,
    /// Element-wise definition of a derived tensor
    Compute { output: TensorId },
    /// Element-wise update with no result tensor
    Mutate,
}

/// A named loop nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub(crate) id: StageId,
    pub(crate) name: String,
    pub(crate) kind: StageKind,
    /// Axes as created, outermost first
    pub(crate) root_axes: Vec<AxisId>,
    /// Current loop order after transformations
    pub(crate) leaf_axes: Vec<AxisId>,
    pub(crate) body: Block,
}

impl Stage {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn body(&self) -> &Block {
        &self.body
    }

    /// Current axes in physical nesting order.
    pub fn axes(&self) -> &[AxisId] {
        &self.leaf_axes
    }

    pub fn root_axes(&self) -> &[AxisId] {
        &self.root_axes
    }

    /// The axis at physical position `index`.
    pub fn axis(&self, index: usize) -> StageResult<AxisId> {
        self.leaf_axes.get(index).copied().ok_or_else(|| {
            ScheduleError::new(
                ScheduleErrorKind::UnknownAxis,
                "axis lookup",
                format!("stage has {} axes, no axis at position {}", self.leaf_axes.len(), index),
            )
            .at_stage(self.name.clone())
            .into()
        })
    }

    pub fn position(&self, axis: AxisId) -> Option<usize> {
        self.leaf_axes.iter().position(|&a| a == axis)
    }

    /// Output tensor of a `compute` stage.
    pub fn output(&self) -> Option<TensorId> {
        match self.kind {
            StageKind::Compute { output } => Some(output),
            _ => None,
        }
    }
}

/// How an axis came to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisKind {
    /// Created with the stage: `for var = lo to hi step step`
    Root { lo: AffineExpr, hi: AffineExpr, step: i64 },
    SplitOuter { parent: AxisId, factor: i64 },
    SplitInner { parent: AxisId, factor: i64 },
    Fused { outer: AxisId, inner: AxisId, inner_extent: i64 },
}

/// What an axis was replaced by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AxisDerivation {
    Split { outer: AxisId, inner: AxisId, factor: i64 },
    Fused { fused: AxisId, inner_extent: i64, is_outer: bool },
}

/// Entry of an axis' transformation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisTransform {
    Split { factor: i64, outer: AxisId, inner: AxisId },
    Fuse { partner: AxisId, fused: AxisId },
    Reorder { position: usize },
    Unroll { factor: i64 },
    /// A stage was relocated under this axis
    ComputeAt { producer: StageId },
}

/// One loop dimension of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub(crate) id: AxisId,
    pub(crate) name: String,
    pub(crate) var: VarId,
    pub(crate) stage: StageId,
    pub(crate) kind: AxisKind,
    pub(crate) derived: Option<AxisDerivation>,
    /// Unroll factor, 0 meaning full
    pub(crate) unroll: Option<i64>,
    pub(crate) log: Vec<AxisTransform>,
}

impl Axis {
    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn kind(&self) -> &AxisKind {
        &self.kind
    }

    pub fn unroll(&self) -> Option<i64> {
        self.unroll
    }

    /// Transformations applied to this axis, in order.
    pub fn log(&self) -> &[AxisTransform] {
        &self.log
    }

    /// Replaced by a split or fuse.
    pub fn is_consumed(&self) -> bool {
        self.derived.is_some()
    }

    /// A root axis no transformation has replaced.
    pub fn is_untouched_root(&self) -> bool {
        matches!(self.kind, AxisKind::Root { .. }) && self.derived.is_none()
    }
}
