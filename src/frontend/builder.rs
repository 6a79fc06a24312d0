//! Kernel tracing.
//!
//! A [`KernelBuilder`] records the statements issued by a kernel function into
//! the block of its innermost open scope. Loops tagged with a stage name become
//! imperative stages when they close; `compute`/`mutate` create element-wise
//! stages directly. The first error poisons the builder: every later call
//! returns it again.

use super::scope::{FrameKind, ScopeStack};
use crate::affine::AffineExpr;
use crate::config::BuildConfig;
use crate::ir::{
    Block, Expr, ForLoop, IfChain, Indexable, Stmt, Tensor, TensorKind, ValueType, VarId,
};
use crate::schedule::{RootAxis, Schedule, StageKind};
use crate::utils::errors::{
    ScopeError, ScopeErrorKind, StageError, StageResult, TypeError, TypeErrorKind,
};
use log::{debug, info, trace};
use std::collections::HashSet;

/// Declaration of a kernel input.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderSpec {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: Option<ValueType>,
}

impl PlaceholderSpec {
    /// Element type; the configured default is used otherwise.
    pub fn dtype(mut self, dtype: ValueType) -> Self {
        self.dtype = Some(dtype);
        self
    }
}

/// Declare a kernel input of the given shape.
pub fn placeholder(name: &str, shape: &[i64]) -> PlaceholderSpec {
    PlaceholderSpec { name: name.to_string(), shape: shape.to_vec(), dtype: None }
}

/// Records a kernel as it is traced.
#[derive(Debug)]
pub struct KernelBuilder {
    schedule: Schedule,
    scopes: ScopeStack,
    /// Stage names taken, including tags of loops still open
    stage_names: HashSet<String>,
    poison: Option<StageError>,
    loop_count: usize,
    compute_count: usize,
    mutate_count: usize,
    scalar_count: usize,
}

impl KernelBuilder {
    pub(crate) fn new(name: &str, config: BuildConfig) -> Self {
        Self {
            schedule: Schedule::new(name, config),
            scopes: ScopeStack::new(),
            stage_names: HashSet::new(),
            poison: None,
            loop_count: 0,
            compute_count: 0,
            mutate_count: 0,
            scalar_count: 0,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.schedule.config
    }

    /// Nesting depth of the innermost open scope; the kernel body is 0.
    pub fn depth(&self) -> usize {
        self.scopes.depth()
    }

    fn check(&self) -> StageResult<()> {
        match &self.poison {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fail<T>(&mut self, err: impl Into<StageError>) -> StageResult<T> {
        let err = err.into();
        debug!("kernel '{}' poisoned: {}", self.schedule.name, err);
        Err(self.poison.get_or_insert(err).clone())
    }

    fn scope_error(&self, kind: ScopeErrorKind, message: impl Into<String>) -> StageError {
        ScopeError::new(kind, message).in_scope(self.scopes.describe(&self.schedule)).into()
    }

    fn guard<T>(&mut self, result: StageResult<T>) -> StageResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.fail(err),
        }
    }

    fn default_dtype(&self, dtype: Option<ValueType>) -> StageResult<ValueType> {
        let dtype = dtype.unwrap_or_else(|| self.schedule.config.default_dtype.clone());
        dtype.validate()?;
        Ok(dtype)
    }

    fn check_shape(name: &str, shape: &[i64]) -> StageResult<()> {
        match shape.iter().find(|&&d| d < 0) {
            Some(d) => Err(TypeError::new(
                TypeErrorKind::InvalidType,
                format!("tensor '{}' has negative extent {}", name, d),
            )
            .into()),
            None => Ok(()),
        }
    }

    fn check_tensor_name(&self, name: &str) -> StageResult<()> {
        if self.schedule.tensor_by_name(name).is_some() {
            return Err(self.scope_error(
                ScopeErrorKind::DuplicateName,
                format!("a tensor named '{}' already exists", name),
            ));
        }
        Ok(())
    }

    /// Reserve a stage name; an explicit name must be unused.
    fn reserve_stage_name(&mut self, name: Option<&str>, prefix: &str) -> StageResult<String> {
        let name = match name {
            Some(name) => {
                if self.stage_names.contains(name) {
                    return Err(self.scope_error(
                        ScopeErrorKind::DuplicateName,
                        format!("a stage named '{}' already exists", name),
                    ));
                }
                name.to_string()
            }
            None => loop {
                let counter = if prefix == "compute" { &mut self.compute_count } else { &mut self.mutate_count };
                let candidate = format!("{}_{}", prefix, *counter);
                *counter += 1;
                if !self.stage_names.contains(&candidate) && self.schedule.tensor_by_name(&candidate).is_none() {
                    break candidate;
                }
            },
        };
        self.stage_names.insert(name.clone());
        Ok(name)
    }

    pub(crate) fn add_placeholder(&mut self, spec: &PlaceholderSpec) -> StageResult<Tensor> {
        self.check()?;
        let result = self.make_placeholder(spec);
        self.guard(result)
    }

    fn make_placeholder(&mut self, spec: &PlaceholderSpec) -> StageResult<Tensor> {
        self.check_tensor_name(&spec.name)?;
        Self::check_shape(&spec.name, &spec.shape)?;
        let dtype = self.default_dtype(spec.dtype.clone())?;
        let id = self.schedule.add_tensor(spec.name.clone(), spec.shape.clone(), dtype, TensorKind::Placeholder);
        self.schedule.args.push(id);
        Ok(self.schedule.tensors[id.0 as usize].handle())
    }

    /// Open a loop `for var = lo; var < hi (or > hi for negative step); var += step`.
    ///
    /// Bounds must be affine in the variables of enclosing loops. A tagged loop
    /// becomes a stage named `tag` when it is closed, together with the
    /// perfectly nested untagged loops directly inside it.
    pub fn for_(
        &mut self,
        lo: impl Into<Expr>,
        hi: impl Into<Expr>,
        step: i64,
        tag: Option<&str>,
    ) -> StageResult<Expr> {
        self.check()?;
        let result = self.open_for(lo.into(), hi.into(), step, tag);
        self.guard(result)
    }

    /// `for_(lo, hi, 1, None)`
    pub fn for_range(&mut self, lo: impl Into<Expr>, hi: impl Into<Expr>) -> StageResult<Expr> {
        self.for_(lo, hi, 1, None)
    }

    fn open_for(&mut self, lo: Expr, hi: Expr, step: i64, tag: Option<&str>) -> StageResult<Expr> {
        let lo = self.loop_bound(&lo, "lower")?;
        let hi = self.loop_bound(&hi, "upper")?;
        if step == 0 {
            return Err(self.scope_error(ScopeErrorKind::InvalidStep, "loop step is zero"));
        }
        if let (Some(l), Some(h)) = (lo.as_constant(), hi.as_constant()) {
            if (step > 0 && l > h) || (step < 0 && l <= h) {
                return Err(self.scope_error(
                    ScopeErrorKind::InvalidStep,
                    format!("step {} never moves from {} towards {}", step, l, h),
                ));
            }
        }
        let tag = match tag {
            Some(name) => Some(self.reserve_stage_name(Some(name), "")?),
            None => None,
        };
        let var = self.schedule.add_var(format!("i{}", self.loop_count), ValueType::Int(32));
        self.loop_count += 1;
        self.scopes.push(FrameKind::For { var, lo, hi, step, tag });
        Ok(Expr::var(var, ValueType::Int(32)))
    }

    fn loop_bound(&self, bound: &Expr, which: &str) -> StageResult<AffineExpr> {
        let affine = bound.to_affine().ok_or_else(|| {
            self.scope_error(
                ScopeErrorKind::NonAffineBound,
                format!("{} bound {} is not affine", which, bound.render(&self.schedule)),
            )
        })?;
        if let Some(var) = affine.vars().into_iter().find(|&v| !self.scopes.is_live(v)) {
            return Err(self.scope_error(
                ScopeErrorKind::NonAffineBound,
                format!("{} bound uses %{} outside of its loop", which, self.schedule.var_name(var)),
            ));
        }
        Ok(affine)
    }

    /// Open a `while` loop.
    pub fn while_(&mut self, cond: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        self.scopes.push(FrameKind::While { cond: cond.into() });
        Ok(())
    }

    /// Open the first branch of a conditional chain.
    pub fn if_(&mut self, cond: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        self.scopes.close_pending_here();
        self.scopes.push(FrameKind::If { cond: cond.into() });
        Ok(())
    }

    /// Open another branch of the chain closed last at this depth.
    pub fn elif_(&mut self, cond: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        let result = self.scopes.check_chain(ScopeErrorKind::UnmatchedElif, &self.schedule);
        self.guard(result)?;
        self.scopes.push(FrameKind::Elif { cond: cond.into() });
        Ok(())
    }

    /// Open the final branch of the chain closed last at this depth.
    pub fn else_(&mut self) -> StageResult<()> {
        self.check()?;
        let result = self.scopes.check_chain(ScopeErrorKind::UnmatchedElse, &self.schedule);
        self.guard(result)?;
        self.scopes.consume_chain();
        self.scopes.push(FrameKind::Else);
        Ok(())
    }

    /// Early exit is not part of the language.
    pub fn break_(&mut self) -> StageResult<()> {
        self.check()?;
        let err = self.scope_error(ScopeErrorKind::EarlyExit, "break_ is not supported");
        self.fail(err)
    }

    /// Close the innermost loop or branch.
    pub fn end(&mut self) -> StageResult<()> {
        self.check()?;
        let result = self.close_frame();
        self.guard(result)
    }

    fn close_frame(&mut self) -> StageResult<()> {
        let frame = self.scopes.close(&self.schedule)?;
        match frame.kind {
            FrameKind::For { var, lo, hi, step, tag: None } => {
                self.scopes.append(Stmt::For(ForLoop { var, lo, hi, step, body: frame.block }));
            }
            FrameKind::For { var, lo, hi, step, tag: Some(name) } => {
                let root = RootAxis { name: self.schedule.var_name(var).to_string(), var, lo, hi, step };
                self.finish_tagged_loop(name, root, frame.block);
            }
            FrameKind::While { cond } => self.scopes.append(Stmt::While { cond, body: frame.block }),
            FrameKind::If { cond } => {
                self.scopes.append_chain(IfChain { branches: vec![(cond, frame.block)], else_body: None });
            }
            FrameKind::Elif { cond } => match self.scopes.last_chain_mut() {
                Some(chain) => chain.branches.push((cond, frame.block)),
                None => return Err(self.scope_error(ScopeErrorKind::UnmatchedElif, "elif_ chain vanished")),
            },
            FrameKind::Else => match self.scopes.last_chain_mut() {
                Some(chain) => chain.else_body = Some(frame.block),
                None => return Err(self.scope_error(ScopeErrorKind::UnmatchedElse, "else_ chain vanished")),
            },
            FrameKind::Kernel | FrameKind::StageBody { .. } => {
                return Err(self.scope_error(ScopeErrorKind::UnmatchedEnd, "end() on a non-closable scope"));
            }
        }
        Ok(())
    }

    /// Turn a closed tagged loop into a stage, absorbing the untagged loops
    /// that are the sole statement of their parent.
    fn finish_tagged_loop(&mut self, name: String, root: RootAxis, mut body: Block) {
        let mut roots = vec![root];
        while body.stmts.len() == 1 && matches!(body.stmts[0], Stmt::For(_)) {
            match body.stmts.pop() {
                Some(Stmt::For(inner)) => {
                    roots.push(RootAxis {
                        name: self.schedule.var_name(inner.var).to_string(),
                        var: inner.var,
                        lo: inner.lo,
                        hi: inner.hi,
                        step: inner.step,
                    });
                    body = inner.body;
                }
                _ => break,
            }
        }
        let axes = roots.len();
        let id = self.schedule.add_stage(name.clone(), StageKind::Imperative, roots, body);
        debug!("created imperative stage '{}' ({}) with {} axes", name, id, axes);
        self.scopes.append(Stmt::Stage(id));
    }

    /// `target[indices] = value`, with `value` converted to the element type.
    pub fn store(&mut self, target: &impl Indexable, indices: &[Expr], value: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        let value = value.into();
        let resolved = target.resolve(indices);
        let (tensor, indices) = self.guard(resolved)?;
        let value = value.cast(tensor.dtype().clone());
        trace!("store to '{}'", tensor.name());
        self.scopes.append(Stmt::Store { tensor: tensor.id(), indices, value });
        Ok(())
    }

    /// `target[index] = value` on a single bit.
    pub fn assign_bit(
        &mut self,
        target: &Expr,
        index: impl Into<Expr>,
        value: impl Into<Expr>,
    ) -> StageResult<()> {
        self.check()?;
        let index = index.into();
        let checked = target.bit(index.clone());
        self.guard(checked)?;
        self.scopes.append(Stmt::BitWrite {
            target: target.clone(),
            index,
            value: value.into().cast(ValueType::UInt(1)),
        });
        Ok(())
    }

    /// `target[lo:hi] = value` on a bit range.
    pub fn assign_slice(&mut self, target: &Expr, lo: u32, hi: u32, value: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        let checked = target.ty.check_slice(lo, hi);
        self.guard(checked)?;
        self.scopes.append(Stmt::SliceWrite {
            target: target.clone(),
            lo,
            hi,
            value: value.into().cast(ValueType::UInt(hi - lo)),
        });
        Ok(())
    }

    /// `target.name = value` on a struct-typed element.
    pub fn assign_field(&mut self, target: &Expr, name: &str, value: impl Into<Expr>) -> StageResult<()> {
        self.check()?;
        let field = match target.ty.as_struct() {
            Some(st) => st.field(name).map(|f| (f.range(), f.ty.clone())),
            None => Err(TypeError::new(
                TypeErrorKind::UnknownField,
                format!("field '{}' on non-struct type '{}'", name, target.ty),
            )
            .into()),
        };
        let ((lo, hi), ty) = self.guard(field)?;
        self.scopes.append(Stmt::SliceWrite { target: target.clone(), lo, hi, value: value.into().cast(ty) });
        Ok(())
    }

    /// A mutable 0-dimensional tensor initialized to `init`.
    pub fn scalar(
        &mut self,
        init: impl Into<Expr>,
        name: Option<&str>,
        dtype: Option<ValueType>,
    ) -> StageResult<Tensor> {
        self.check()?;
        let result = self.make_scalar(init.into(), name, dtype);
        self.guard(result)
    }

    fn make_scalar(&mut self, init: Expr, name: Option<&str>, dtype: Option<ValueType>) -> StageResult<Tensor> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                self.scalar_count += 1;
                format!("scalar_{}", self.scalar_count - 1)
            }
        };
        self.check_tensor_name(&name)?;
        let dtype = self.default_dtype(dtype)?;
        let id = self.schedule.add_tensor(name, Vec::new(), dtype.clone(), TensorKind::Scalar);
        self.scopes.append(Stmt::Store { tensor: id, indices: Vec::new(), value: init.cast(dtype) });
        Ok(self.schedule.tensors[id.0 as usize].handle())
    }

    /// Define a new tensor element-wise: `out[i..] = body(i..)`.
    pub fn compute<F>(
        &mut self,
        shape: &[i64],
        name: Option<&str>,
        dtype: Option<ValueType>,
        body: F,
    ) -> StageResult<Tensor>
    where
        F: FnOnce(&mut KernelBuilder, &[Expr]) -> StageResult<Expr>,
    {
        self.check()?;
        let opened = self.open_stage_body(shape, name, "compute");
        let (name, roots, indices) = self.guard(opened)?;
        let dtype = match self.default_dtype(dtype) {
            Ok(dtype) => dtype,
            Err(err) => return self.fail(err),
        };
        let value = body(self, &indices);
        let value = self.guard(value)?;
        let closed = self.scopes.close_stage_body(&self.schedule);
        let mut block = self.guard(closed)?;

        let stage = self.schedule.next_stage_id();
        let tensor = self.schedule.add_tensor(name.clone(), shape.to_vec(), dtype.clone(), TensorKind::Derived { stage });
        block.push(Stmt::Store { tensor, indices, value: value.cast(dtype) });
        let id = self.schedule.add_stage(name.clone(), StageKind::Compute { output: tensor }, roots, block);
        debug!("created compute stage '{}' ({}) of shape {:?}", name, id, shape);
        self.scopes.append(Stmt::Stage(id));
        Ok(self.schedule.tensors[tensor.0 as usize].handle())
    }

    /// Run `body` for every index of `shape` as a stage with no result.
    pub fn mutate<F>(&mut self, shape: &[i64], name: Option<&str>, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder, &[Expr]) -> StageResult<()>,
    {
        self.check()?;
        let opened = self.open_stage_body(shape, name, "mutate");
        let (name, roots, indices) = self.guard(opened)?;
        let result = body(self, &indices);
        self.guard(result)?;
        let closed = self.scopes.close_stage_body(&self.schedule);
        let block = self.guard(closed)?;
        let id = self.schedule.add_stage(name.clone(), StageKind::Mutate, roots, block);
        debug!("created mutate stage '{}' ({}) of shape {:?}", name, id, shape);
        self.scopes.append(Stmt::Stage(id));
        Ok(())
    }

    fn open_stage_body(
        &mut self,
        shape: &[i64],
        name: Option<&str>,
        prefix: &str,
    ) -> StageResult<(String, Vec<RootAxis>, Vec<Expr>)> {
        let display = name.unwrap_or(prefix);
        Self::check_shape(display, shape)?;
        if prefix == "compute" {
            if let Some(name) = name {
                self.check_tensor_name(name)?;
            }
        }
        let name = self.reserve_stage_name(name, prefix)?;
        let mut roots = Vec::with_capacity(shape.len());
        let mut indices = Vec::with_capacity(shape.len());
        let mut vars: Vec<VarId> = Vec::with_capacity(shape.len());
        for (d, &extent) in shape.iter().enumerate() {
            let axis_name = format!("{}_i{}", name, d);
            let var = self.schedule.add_var(axis_name.clone(), ValueType::Int(32));
            roots.push(RootAxis {
                name: axis_name,
                var,
                lo: AffineExpr::zero(),
                hi: AffineExpr::constant(extent),
                step: 1,
            });
            indices.push(Expr::var(var, ValueType::Int(32)));
            vars.push(var);
        }
        self.scopes.push(FrameKind::StageBody { name: name.clone(), vars });
        Ok((name, roots, indices))
    }

    /// `for_` + `body` + `end`.
    pub fn for_each<F>(
        &mut self,
        lo: impl Into<Expr>,
        hi: impl Into<Expr>,
        step: i64,
        tag: Option<&str>,
        body: F,
    ) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder, Expr) -> StageResult<()>,
    {
        let var = self.for_(lo, hi, step, tag)?;
        self.scoped(|kb| body(kb, var))
    }

    /// `while_` + `body` + `end`.
    pub fn while_loop<F>(&mut self, cond: impl Into<Expr>, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder) -> StageResult<()>,
    {
        self.while_(cond)?;
        self.scoped(body)
    }

    /// `if_` + `body` + `end`.
    pub fn if_then<F>(&mut self, cond: impl Into<Expr>, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder) -> StageResult<()>,
    {
        self.if_(cond)?;
        self.scoped(body)
    }

    /// `elif_` + `body` + `end`.
    pub fn elif_then<F>(&mut self, cond: impl Into<Expr>, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder) -> StageResult<()>,
    {
        self.elif_(cond)?;
        self.scoped(body)
    }

    /// `else_` + `body` + `end`.
    pub fn else_then<F>(&mut self, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder) -> StageResult<()>,
    {
        self.else_()?;
        self.scoped(body)
    }

    /// Run `body` inside the scope just opened, then close it.
    fn scoped<F>(&mut self, body: F) -> StageResult<()>
    where
        F: FnOnce(&mut KernelBuilder) -> StageResult<()>,
    {
        let depth = self.scopes.depth();
        let result = body(self);
        self.guard(result)?;
        if self.scopes.depth() != depth {
            let err = self.scope_error(ScopeErrorKind::UnclosedScope, "scoped body left a scope open");
            return self.fail(err);
        }
        self.end()
    }

    /// Finish tracing: all scopes closed, `outputs` appended to the arguments.
    pub(crate) fn finish(mut self, outputs: Vec<Tensor>) -> StageResult<Schedule> {
        self.check()?;
        let body = self.scopes.finish(&self.schedule)?;
        self.schedule.body = body;
        for tensor in outputs {
            let id = tensor.id();
            if self.schedule.tensor(id).map(|t| t.name.as_str()) != Some(tensor.name()) {
                return Err(ScopeError::new(
                    ScopeErrorKind::UnclosedScope,
                    format!("returned tensor '{}' does not belong to this kernel", tensor.name()),
                )
                .into());
            }
            if !self.schedule.args.contains(&id) {
                self.schedule.args.push(id);
            }
        }
        info!(
            "traced kernel '{}': {} stages, {} tensors",
            self.schedule.name,
            self.schedule.stages.len(),
            self.schedule.tensors.len()
        );
        Ok(self.schedule)
    }

    /// The error that poisoned this builder, if any.
    pub(crate) fn poisoned(&self) -> Option<&StageError> {
        self.poison.as_ref()
    }
}

/// Trace `kernel` into a schedule.
///
/// The kernel receives one tensor per placeholder and returns the tensors that
/// become additional kernel arguments after the placeholders.
pub fn create_schedule<F>(
    config: &BuildConfig,
    name: &str,
    placeholders: &[PlaceholderSpec],
    kernel: F,
) -> StageResult<Schedule>
where
    F: FnOnce(&mut KernelBuilder, &[Tensor]) -> StageResult<Vec<Tensor>>,
{
    let mut kb = KernelBuilder::new(name, config.clone());
    let mut inputs = Vec::with_capacity(placeholders.len());
    for spec in placeholders {
        inputs.push(kb.add_placeholder(spec)?);
    }
    match kernel(&mut kb, &inputs) {
        Ok(outputs) => kb.finish(outputs),
        Err(err) => Err(kb.poisoned().cloned().unwrap_or(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace<F>(kernel: F) -> StageResult<Schedule>
    where
        F: FnOnce(&mut KernelBuilder, &[Tensor]) -> StageResult<Vec<Tensor>>,
    {
        create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[10])], kernel)
    }

    #[test]
    fn test_tagged_loop_peels_nest() {
        let s = trace(|kb, _| {
            kb.for_(0, 10, 1, Some("S"))?;
            kb.for_(0, 20, 1, None)?;
            kb.end()?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap();
        let stage = s.stage("S").unwrap();
        assert_eq!(stage.root_axes().len(), 2);
        assert!(stage.body().is_empty());
        assert!(s.is_top_level(stage.id()));
    }

    #[test]
    fn test_loop_with_two_statements_is_not_peeled() {
        let s = trace(|kb, ts| {
            let a = ts[0].clone();
            kb.for_(0, 10, 1, Some("S"))?;
            let j = kb.for_range(0, 10)?;
            kb.store(&a, &[j], 1)?;
            kb.end()?;
            kb.store(&a, &[Expr::int(0)], 2)?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap();
        let stage = s.stage("S").unwrap();
        assert_eq!(stage.root_axes().len(), 1);
        assert_eq!(stage.body().stmts.len(), 2);
    }

    #[test]
    fn test_compute_creates_derived_tensor() {
        let s = trace(|kb, ts| {
            let a = ts[0].clone();
            let c = kb.compute(&[10], Some("C"), None, |_, i| Ok(a.at(i)? + 1))?;
            Ok(vec![c])
        })
        .unwrap();
        let c = s.tensor_by_name("C").unwrap();
        assert_eq!(c.kind, TensorKind::Derived { stage: s.stage_id("C").unwrap() });
        assert_eq!(s.args().len(), 2);
    }

    #[test]
    fn test_auto_names() {
        let s = trace(|kb, _| {
            kb.compute(&[2], None, None, |_, _| Ok(Expr::int(0)))?;
            kb.mutate(&[2], None, |_, _| Ok(()))?;
            kb.compute(&[2], None, None, |_, _| Ok(Expr::int(0)))?;
            Ok(vec![])
        })
        .unwrap();
        assert!(s.stage("compute_0").is_ok());
        assert!(s.stage("compute_1").is_ok());
        assert!(s.stage("mutate_0").is_ok());
    }

    #[test]
    fn test_poisoned_builder_repeats_first_error() {
        let err = trace(|kb, _| {
            let first = kb.break_().unwrap_err();
            assert_eq!(first.scope_kind(), Some(ScopeErrorKind::EarlyExit));
            let again = kb.for_range(0, 4).unwrap_err();
            assert_eq!(again, first);
            Ok(vec![])
        })
        .unwrap_err();
        assert_eq!(err.scope_kind(), Some(ScopeErrorKind::EarlyExit));
    }

    #[test]
    fn test_negative_step_bounds() {
        let ok = trace(|kb, _| {
            kb.for_(10, 0, -1, None)?;
            kb.end()?;
            Ok(vec![])
        });
        assert!(ok.is_ok());
        let err = trace(|kb, _| {
            kb.for_(0, 10, -1, None)?;
            Ok(vec![])
        })
        .unwrap_err();
        assert_eq!(err.scope_kind(), Some(ScopeErrorKind::InvalidStep));
    }

    #[test]
    fn test_scalar_initializes() {
        let s = trace(|kb, _| {
            let acc = kb.scalar(3, Some("acc"), None)?;
            assert_eq!(acc.ndim(), 0);
            Ok(vec![])
        })
        .unwrap();
        assert!(matches!(s.body().stmts[0], Stmt::Store { .. }));
    }
}
