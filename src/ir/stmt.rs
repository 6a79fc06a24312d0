//! Statement IR produced by tracing.

use super::expr::{Expr, ExprKind, TensorId, VarId};
use crate::affine::AffineExpr;
use crate::schedule::StageId;
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

/// An ordered list of statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Tensors read by this block, not descending into nested stages.
    pub fn reads(&self, out: &mut BTreeSet<TensorId>) {
        for stmt in &self.stmts {
            stmt.reads(out);
        }
    }

    /// Tensors written by this block, not descending into nested stages.
    pub fn writes(&self, out: &mut BTreeSet<TensorId>) {
        for stmt in &self.stmts {
            stmt.writes(out);
        }
    }

    /// Stages referenced directly or inside nested control flow.
    pub fn stages(&self, out: &mut Vec<StageId>) {
        for stmt in &self.stmts {
            stmt.stages(out);
        }
    }

    /// Visit every expression, not descending into nested stages.
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        for stmt in &self.stmts {
            stmt.visit_exprs(f);
        }
    }
}

/// A counted loop with affine bounds `[lo, hi)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub var: VarId,
    pub lo: AffineExpr,
    pub hi: AffineExpr,
    pub step: i64,
    pub body: Block,
}

/// An `if` with any number of `elif` branches and an optional `else`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfChain {
    pub branches: Vec<(Expr, Block)>,
    pub else_body: Option<Block>,
}

impl IfChain {
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.branches.iter().map(|(_, b)| b).chain(self.else_body.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Element write
    Store { tensor: TensorId, indices: Vec<Expr>, value: Expr },
    /// Write one bit of `target`; lost when `target` is not storage-backed
    BitWrite { target: Expr, index: Expr, value: Expr },
    /// Write bits `[lo, hi)` of `target`; lost when `target` is not storage-backed
    SliceWrite { target: Expr, lo: u32, hi: u32, value: Expr },
    For(ForLoop),
    While { cond: Expr, body: Block },
    If(IfChain),
    /// Placement of a stage in program order
    Stage(StageId),
}

impl Stmt {
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Stmt::Store { indices, value, .. } => {
                indices.iter().for_each(|i| i.visit(f));
                value.visit(f);
            }
            Stmt::BitWrite { target, index, value } => {
                target.visit(f);
                index.visit(f);
                value.visit(f);
            }
            Stmt::SliceWrite { target, value, .. } => {
                target.visit(f);
                value.visit(f);
            }
            Stmt::For(l) => l.body.visit_exprs(f),
            Stmt::While { cond, body } => {
                cond.visit(f);
                body.visit_exprs(f);
            }
            Stmt::If(chain) => {
                for (cond, body) in &chain.branches {
                    cond.visit(f);
                    body.visit_exprs(f);
                }
                if let Some(body) = &chain.else_body {
                    body.visit_exprs(f);
                }
            }
            Stmt::Stage(_) => {}
        }
    }

    pub fn reads(&self, out: &mut BTreeSet<TensorId>) {
        self.visit_exprs(&mut |e| {
            if let ExprKind::Load { tensor, .. } = e.kind {
                out.insert(tensor);
            }
        });
    }

    pub fn writes(&self, out: &mut BTreeSet<TensorId>) {
        match self {
            Stmt::Store { tensor, .. } => {
                out.insert(*tensor);
            }
            Stmt::BitWrite { target, .. } | Stmt::SliceWrite { target, .. } => {
                if let Some(tensor) = storage_root(target) {
                    out.insert(tensor);
                }
            }
            Stmt::For(l) => l.body.writes(out),
            Stmt::While { body, .. } => body.writes(out),
            Stmt::If(chain) => chain.blocks().for_each(|b| b.writes(out)),
            Stmt::Stage(_) => {}
        }
    }

    /// Stage markers in this statement, outermost first.
    pub fn stages(&self, out: &mut Vec<StageId>) {
        match self {
            Stmt::Stage(id) => out.push(*id),
            Stmt::For(l) => l.body.stages(out),
            Stmt::While { body, .. } => body.stages(out),
            Stmt::If(chain) => chain.blocks().for_each(|b| b.stages(out)),
            _ => {}
        }
    }

    pub fn reads_tensor(&self, tensor: TensorId) -> bool {
        let mut found = false;
        self.visit_exprs(&mut |e| {
            if let ExprKind::Load { tensor: t, .. } = e.kind {
                found |= t == tensor;
            }
        });
        found
    }
}

/// The tensor a bit/slice write lands in, if the target is storage-backed.
pub fn storage_root(target: &Expr) -> Option<TensorId> {
    match &target.kind {
        ExprKind::Load { tensor, .. } => Some(*tensor),
        ExprKind::GetSlice { value, .. } => storage_root(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ValueType;

    #[test]
    fn test_storage_root() {
        let load = Expr::load(TensorId(3), vec![Expr::int(0)], ValueType::UInt(16));
        assert_eq!(storage_root(&load), Some(TensorId(3)));
        assert_eq!(storage_root(&load.slice(0, 8).unwrap()), Some(TensorId(3)));
        assert_eq!(storage_root(&(load.clone() + 1)), None);
    }

    #[test]
    fn test_reads_and_writes() {
        let a = Expr::load(TensorId(0), vec![Expr::int(1)], ValueType::Int(32));
        let mut block = Block::new();
        block.push(Stmt::Store { tensor: TensorId(1), indices: vec![Expr::int(1)], value: a });
        let mut reads = BTreeSet::new();
        let mut writes = BTreeSet::new();
        block.reads(&mut reads);
        block.writes(&mut writes);
        assert!(reads.contains(&TensorId(0)));
        assert_eq!(writes.into_iter().collect::<Vec<_>>(), vec![TensorId(1)]);
    }
}
