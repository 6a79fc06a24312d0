//! Scope frames and the pending-conditional stack.
//!
//! Every open loop, conditional branch or stage body is an explicit frame that
//! collects the statements traced while it is innermost. Completed `if` chains
//! that may still receive an `elif_`/`else_` are tracked by the nesting depth
//! of the block holding them.

use crate::affine::AffineExpr;
use crate::ir::{Block, Expr, IfChain, Stmt, VarId};
use crate::schedule::Schedule;
use crate::utils::errors::{ScopeError, ScopeErrorKind, StageResult};
use log::trace;

#[derive(Debug, Clone)]
pub(crate) enum FrameKind {
    Kernel,
    For { var: VarId, lo: AffineExpr, hi: AffineExpr, step: i64, tag: Option<String> },
    While { cond: Expr },
    If { cond: Expr },
    Elif { cond: Expr },
    Else,
    StageBody { name: String, vars: Vec<VarId> },
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub kind: FrameKind,
    pub block: Block,
}

/// Open `if` chains, by the depth of the block their statement lives in.
#[derive(Debug, Default)]
struct PendingConditionals {
    depths: Vec<usize>,
}

impl PendingConditionals {
    /// A statement other than an `elif_`/`else_` landed at `depth`: chains there
    /// and below can no longer be continued.
    fn close_from(&mut self, depth: usize) {
        self.depths.retain(|&d| d < depth);
    }

    fn open(&mut self, depth: usize) {
        self.depths.push(depth);
    }

    fn top_is(&self, depth: usize) -> bool {
        self.depths.last() == Some(&depth)
    }

    fn pop(&mut self) {
        self.depths.pop();
    }
}

#[derive(Debug)]
pub(crate) struct ScopeStack {
    frames: Vec<Frame>,
    pending: PendingConditionals,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame { kind: FrameKind::Kernel, block: Block::new() }],
            pending: PendingConditionals::default(),
        }
    }

    /// Depth of the innermost block; the kernel body is 0.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn push(&mut self, kind: FrameKind) {
        trace!("open scope {:?} at depth {}", kind_label(&kind), self.frames.len());
        self.frames.push(Frame { kind, block: Block::new() });
    }

    fn current(&mut self) -> &mut Block {
        let top = self.frames.len() - 1;
        &mut self.frames[top].block
    }

    /// Append a statement to the innermost block.
    pub fn append(&mut self, stmt: Stmt) {
        self.pending.close_from(self.depth());
        self.current().push(stmt);
    }

    /// Append a completed `if` chain that later `elif_`/`else_` may extend.
    pub fn append_chain(&mut self, chain: IfChain) {
        self.append(Stmt::If(chain));
        self.pending.open(self.depth());
    }

    /// A new `if_` starts a new statement at the current depth.
    pub fn close_pending_here(&mut self) {
        self.pending.close_from(self.depth());
    }

    /// Check that an `elif_`/`else_` has a chain to attach to.
    pub fn check_chain(&self, kind: ScopeErrorKind, schedule: &Schedule) -> StageResult<()> {
        let depth = self.depth();
        let attachable = self.pending.top_is(depth)
            && matches!(self.frames[depth].block.stmts.last(), Some(Stmt::If(c)) if c.else_body.is_none());
        if attachable {
            return Ok(());
        }
        let what = if kind == ScopeErrorKind::UnmatchedElse { "else_" } else { "elif_" };
        Err(ScopeError::new(kind, format!("{} without an open if_ chain at this depth", what))
            .in_scope(self.describe(schedule))
            .into())
    }

    /// The chain an `else_` consumes is no longer eligible for attachment.
    pub fn consume_chain(&mut self) {
        self.pending.pop();
    }

    /// The chain statement ending the innermost block.
    pub fn last_chain_mut(&mut self) -> Option<&mut IfChain> {
        match self.current().stmts.last_mut() {
            Some(Stmt::If(chain)) => Some(chain),
            _ => None,
        }
    }

    /// Close the innermost control-flow frame for `end()`.
    pub fn close(&mut self, schedule: &Schedule) -> StageResult<Frame> {
        match self.frames.last().map(|f| &f.kind) {
            None | Some(FrameKind::Kernel) => {
                Err(ScopeError::new(ScopeErrorKind::UnmatchedEnd, "end() with no open scope").into())
            }
            Some(FrameKind::StageBody { name, .. }) => Err(ScopeError::new(
                ScopeErrorKind::UnmatchedEnd,
                format!("end() would close the body of stage '{}'", name),
            )
            .in_scope(self.describe(schedule))
            .into()),
            Some(_) => Ok(self.pop()),
        }
    }

    /// Close a stage body; it must be the innermost frame.
    pub fn close_stage_body(&mut self, schedule: &Schedule) -> StageResult<Block> {
        match self.frames.last().map(|f| &f.kind) {
            Some(FrameKind::StageBody { .. }) => Ok(self.pop().block),
            _ => Err(ScopeError::new(ScopeErrorKind::UnclosedScope, "stage body left a scope open")
                .in_scope(self.describe(schedule))
                .into()),
        }
    }

    /// Take the kernel body; every other frame must be closed.
    pub fn finish(mut self, schedule: &Schedule) -> StageResult<Block> {
        if self.frames.len() != 1 {
            return Err(ScopeError::new(ScopeErrorKind::UnclosedScope, "kernel ends with a scope still open")
                .in_scope(self.describe(schedule))
                .into());
        }
        Ok(self.pop().block)
    }

    fn pop(&mut self) -> Frame {
        let depth = self.depth();
        self.pending.close_from(depth);
        let frame = self.frames.pop().unwrap_or(Frame { kind: FrameKind::Kernel, block: Block::new() });
        trace!("close scope {:?} at depth {}", kind_label(&frame.kind), depth);
        frame
    }

    /// Whether a variable belongs to an open loop or stage body.
    pub fn is_live(&self, var: VarId) -> bool {
        self.frames.iter().any(|f| match &f.kind {
            FrameKind::For { var: v, .. } => *v == var,
            FrameKind::StageBody { vars, .. } => vars.contains(&var),
            _ => false,
        })
    }

    /// Human-readable innermost scope.
    pub fn describe(&self, schedule: &Schedule) -> String {
        match self.frames.last().map(|f| &f.kind) {
            Some(FrameKind::For { var, tag: Some(tag), .. }) => {
                format!("for %{} tagged '{}'", schedule.var_name(*var), tag)
            }
            Some(FrameKind::For { var, .. }) => format!("for %{}", schedule.var_name(*var)),
            Some(FrameKind::StageBody { name, .. }) => format!("stage '{}'", name),
            Some(kind) => kind_label(kind).to_string(),
            None => "kernel".to_string(),
        }
    }
}

fn kind_label(kind: &FrameKind) -> &'static str {
    match kind {
        FrameKind::Kernel => "kernel",
        FrameKind::For { .. } => "for",
        FrameKind::While { .. } => "while",
        FrameKind::If { .. } => "if",
        FrameKind::Elif { .. } => "elif",
        FrameKind::Else => "else",
        FrameKind::StageBody { .. } => "stage body",
    }
}
