//! Lowered loop-nest IR.

use crate::affine::IndexExpr;
use crate::ir::{Expr, ExprKind, NameTable, TensorId, TensorInfo, VarId, VarInfo};
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

/// A counted loop over `[lower, upper)` (or down to `upper` for a negative step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstFor {
    pub var: VarId,
    pub lower: IndexExpr,
    pub upper: IndexExpr,
    pub step: i64,
    /// Unroll factor kept as an attribute, 0 meaning full
    pub unroll: Option<i64>,
    /// Name of the stage whose outermost loop this is
    pub stage: Option<String>,
    pub body: Vec<AstNode>,
}

/// A node in the lowered loop nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    For(AstFor),
    While { cond: Expr, body: Vec<AstNode> },
    If { branches: Vec<(Expr, Vec<AstNode>)>, else_body: Option<Vec<AstNode>> },
    /// Runs `body` only when `lhs < upper`
    Guard { lhs: IndexExpr, upper: IndexExpr, body: Vec<AstNode> },
    /// Assigns a variable for the rest of the enclosing body
    Bind { var: VarId, value: IndexExpr },
    Store { tensor: TensorId, indices: Vec<Expr>, value: Expr },
    /// Overwrite bits `[offset, offset + width)` of one element
    StoreBits { tensor: TensorId, indices: Vec<Expr>, offset: Expr, width: u32, value: Expr },
    /// Straight-line sequence, used for unrolled copies
    Block(Vec<AstNode>),
}

impl AstNode {
    pub fn as_for(&self) -> Option<&AstFor> {
        match self {
            AstNode::For(l) => Some(l),
            _ => None,
        }
    }

    /// Child bodies, in order.
    pub fn bodies(&self) -> Vec<&[AstNode]> {
        match self {
            AstNode::For(l) => vec![l.body.as_slice()],
            AstNode::While { body, .. } | AstNode::Guard { body, .. } => vec![body.as_slice()],
            AstNode::If { branches, else_body } => {
                let mut out: Vec<&[AstNode]> = branches.iter().map(|(_, b)| b.as_slice()).collect();
                if let Some(b) = else_body {
                    out.push(b.as_slice());
                }
                out
            }
            AstNode::Block(nodes) => vec![nodes.as_slice()],
            AstNode::Bind { .. } | AstNode::Store { .. } | AstNode::StoreBits { .. } => Vec::new(),
        }
    }

    /// Visit every expression in this node and below.
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            AstNode::Store { indices, value, .. } => {
                indices.iter().for_each(|i| i.visit(f));
                value.visit(f);
            }
            AstNode::StoreBits { indices, offset, value, .. } => {
                indices.iter().for_each(|i| i.visit(f));
                offset.visit(f);
                value.visit(f);
            }
            AstNode::While { cond, .. } => cond.visit(f),
            AstNode::If { branches, .. } => branches.iter().for_each(|(c, _)| c.visit(f)),
            _ => {}
        }
        for body in self.bodies() {
            body.iter().for_each(|n| n.visit_exprs(f));
        }
    }

    /// Whether this node reads any of `tensors`.
    pub fn reads_any(&self, tensors: &BTreeSet<TensorId>) -> bool {
        let mut found = false;
        self.visit_exprs(&mut |e| {
            if let ExprKind::Load { tensor, .. } = &e.kind {
                found |= tensors.contains(tensor);
            }
        });
        found
    }

    /// Loops of this node and below, pre-order.
    pub fn loops<'a>(&'a self, out: &mut Vec<&'a AstNode>) {
        if matches!(self, AstNode::For(_)) {
            out.push(self);
        }
        for body in self.bodies() {
            body.iter().for_each(|n| n.loops(out));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorRole {
    /// Passed in by the caller
    Arg,
    /// Allocated by the kernel
    Local,
}

/// The output of lowering: one function over the kernel arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweredKernel {
    pub(crate) name: String,
    /// Every tensor, indexed by id
    pub(crate) tensors: Vec<TensorInfo>,
    pub(crate) args: Vec<TensorId>,
    pub(crate) vars: Vec<VarInfo>,
    pub(crate) body: Vec<AstNode>,
}

impl LoweredKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &[AstNode] {
        &self.body
    }

    pub fn vars(&self) -> &[VarInfo] {
        &self.vars
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorInfo> {
        self.tensors.get(id.0 as usize)
    }

    pub fn role(&self, id: TensorId) -> TensorRole {
        if self.args.contains(&id) {
            TensorRole::Arg
        } else {
            TensorRole::Local
        }
    }

    /// Arguments: placeholders, then returned tensors.
    pub fn args(&self) -> impl Iterator<Item = &TensorInfo> {
        self.args.iter().filter_map(move |&id| self.tensor(id))
    }

    /// Tensors allocated by the kernel.
    pub fn locals(&self) -> impl Iterator<Item = &TensorInfo> {
        self.tensors.iter().filter(move |t| !self.args.contains(&t.id))
    }

    /// For every top-level loop, the loops of its nest in pre-order.
    pub fn loop_nests(&self) -> Vec<Vec<&AstNode>> {
        let mut nests = Vec::new();
        collect_nests(&self.body, &mut nests);
        nests
    }
}

fn collect_nests<'a>(nodes: &'a [AstNode], nests: &mut Vec<Vec<&'a AstNode>>) {
    for node in nodes {
        match node {
            AstNode::For(_) => {
                let mut loops = Vec::new();
                node.loops(&mut loops);
                nests.push(loops);
            }
            AstNode::Block(inner) | AstNode::Guard { body: inner, .. } => collect_nests(inner, nests),
            _ => {}
        }
    }
}

impl NameTable for LoweredKernel {
    fn var_name(&self, var: VarId) -> String {
        self.vars.get(var.0 as usize).map(|v| v.name.clone()).unwrap_or_else(|| var.to_string())
    }

    fn tensor_name(&self, tensor: TensorId) -> String {
        self.tensor(tensor).map(|t| t.name.clone()).unwrap_or_else(|| tensor.to_string())
    }
}
