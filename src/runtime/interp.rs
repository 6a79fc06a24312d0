//! Reference interpreter for lowered kernels.

use super::array::{check_width, round_float, wrap, HostArray, MAX_WIDTH};
use crate::affine::IndexExpr;
use crate::codegen::{AstNode, LoweredKernel};
use crate::config::RuntimeConfig;
use crate::ir::{BinaryOp, CmpOp, Expr, ExprKind, LogicalOp, NameTable, TensorId, UnaryOp, ValueType, VarId};
use crate::utils::errors::{ExecutionError, ExecutionErrorKind, StageError, StageResult};
use std::collections::HashMap;

/// A computed value: the raw bits of an integer-like value, or a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Int(i128),
    Float(f64),
}

impl Value {
    fn truthy(self) -> bool {
        match self {
            Value::Int(v) => v != 0,
            Value::Float(x) => x != 0.0,
        }
    }

    fn raw(self) -> i128 {
        match self {
            Value::Int(v) => v,
            Value::Float(x) => x as i128,
        }
    }

    fn real(self, ty: &ValueType) -> f64 {
        match self {
            Value::Int(v) => v as f64 / 2f64.powi(ty.frac() as i32),
            Value::Float(x) => x,
        }
    }
}

fn error(kind: ExecutionErrorKind, message: String) -> StageError {
    ExecutionError::new(kind, message).into()
}

/// Convert a value of type `from` to type `to`.
pub(crate) fn convert(value: Value, from: &ValueType, to: &ValueType) -> StageResult<Value> {
    if !to.is_float() && to.bits() > MAX_WIDTH {
        return Err(error(
            ExecutionErrorKind::UnsupportedWidth,
            format!("cannot evaluate values of type '{}'", to),
        ));
    }
    Ok(match (value, to.is_float()) {
        (_, true) => Value::Float(round_float(value.real(from), to.bits())),
        (Value::Float(x), false) => Value::Int(wrap((x * 2f64.powi(to.frac() as i32)).trunc() as i128, to)),
        (Value::Int(raw), false) => {
            let (src, dst) = (from.frac(), to.frac());
            let rescaled = if dst >= src { raw << (dst - src) } else { raw >> (src - dst) };
            Value::Int(wrap(rescaled, to))
        }
    })
}

/// Interpreter state for one run.
pub(crate) struct Machine<'a> {
    kernel: &'a LoweredKernel,
    config: &'a RuntimeConfig,
    memory: Vec<Option<HostArray>>,
    env: HashMap<VarId, i64>,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(kernel: &'a LoweredKernel, config: &'a RuntimeConfig, memory: Vec<Option<HostArray>>) -> Self {
        Self { kernel, config, memory, env: HashMap::new() }
    }

    pub(crate) fn into_memory(self) -> Vec<Option<HostArray>> {
        self.memory
    }

    pub(crate) fn run(&mut self, nodes: &[AstNode]) -> StageResult<()> {
        for node in nodes {
            self.exec(node)?;
        }
        Ok(())
    }

    fn exec(&mut self, node: &AstNode) -> StageResult<()> {
        match node {
            AstNode::For(l) => {
                let lo = self.index(&l.lower)?;
                let hi = self.index(&l.upper)?;
                let mut i = lo;
                while (l.step > 0 && i < hi) || (l.step < 0 && i > hi) {
                    self.env.insert(l.var, i);
                    self.run(&l.body)?;
                    i += l.step;
                }
            }
            AstNode::While { cond, body } => {
                let mut iterations = 0u64;
                while self.eval(cond)?.truthy() {
                    iterations += 1;
                    if iterations > self.config.max_while_iterations {
                        return Err(error(
                            ExecutionErrorKind::IterationLimit,
                            format!("while loop exceeded {} iterations", self.config.max_while_iterations),
                        ));
                    }
                    self.run(body)?;
                }
            }
            AstNode::If { branches, else_body } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.run(body);
                    }
                }
                if let Some(body) = else_body {
                    self.run(body)?;
                }
            }
            AstNode::Guard { lhs, upper, body } => {
                if self.index(lhs)? < self.index(upper)? {
                    self.run(body)?;
                }
            }
            AstNode::Bind { var, value } => {
                let v = self.index(value)?;
                self.env.insert(*var, v);
            }
            AstNode::Store { tensor, indices, value } => {
                let v = self.eval(value)?;
                let (id, offset) = self.element(*tensor, indices)?;
                let array = self.array_mut(id)?;
                let dtype = array.dtype().clone();
                let v = convert(v, &value.ty, &dtype)?;
                match v {
                    Value::Float(x) => array.store_float(offset, x),
                    Value::Int(raw) => array.store_raw(offset, raw),
                }
            }
            AstNode::StoreBits { tensor, indices, offset, width, value } => {
                let bits = self.eval(value)?.raw();
                let at = self.eval_index(offset)?;
                let (id, element) = self.element(*tensor, indices)?;
                let name = self.kernel.tensor_name(*tensor);
                let array = self.array_mut(id)?;
                let total = array.dtype().bits() as i64;
                if at < 0 || at + *width as i64 > total {
                    return Err(error(
                        ExecutionErrorKind::OutOfBounds,
                        format!("bits [{}, {}) outside the {}-bit elements of '{}'", at, at + *width as i64, total, name),
                    ));
                }
                let mask = ((1i128 << width) - 1) << at;
                let old = array.load_raw(element);
                array.store_raw(element, (old & !mask) | ((bits << at) & mask));
            }
            AstNode::Block(nodes) => self.run(nodes)?,
        }
        Ok(())
    }

    fn index(&self, e: &IndexExpr) -> StageResult<i64> {
        e.evaluate(&self.env).ok_or_else(|| {
            let missing: Vec<String> = e
                .vars()
                .into_iter()
                .filter(|v| !self.env.contains_key(v))
                .map(|v| self.kernel.var_name(v))
                .collect();
            error(ExecutionErrorKind::UnboundVariable, format!("unbound loop variables: {}", missing.join(", ")))
        })
    }

    fn array(&self, id: TensorId) -> StageResult<&HostArray> {
        self.memory.get(id.0 as usize).and_then(Option::as_ref).ok_or_else(|| {
            error(ExecutionErrorKind::ArgumentMismatch, format!("no storage for tensor '{}'", self.kernel.tensor_name(id)))
        })
    }

    fn array_mut(&mut self, id: TensorId) -> StageResult<&mut HostArray> {
        let name = self.kernel.tensor_name(id);
        self.memory
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| error(ExecutionErrorKind::ArgumentMismatch, format!("no storage for tensor '{}'", name)))
    }

    /// Tensor and element offset of an access.
    fn element(&self, tensor: TensorId, indices: &[Expr]) -> StageResult<(TensorId, usize)> {
        let index = indices.iter().map(|i| self.eval_index(i)).collect::<StageResult<Vec<_>>>()?;
        let array = self.array(tensor)?;
        let offset = array.offset(&index).ok_or_else(|| {
            error(
                ExecutionErrorKind::OutOfBounds,
                format!("index {:?} outside tensor '{}' of shape {:?}", index, self.kernel.tensor_name(tensor), array.shape()),
            )
        })?;
        Ok((tensor, offset))
    }

    /// Integer value of an index expression.
    fn eval_index(&self, e: &Expr) -> StageResult<i64> {
        let v = self.eval(e)?;
        Ok(match v {
            Value::Int(raw) => (raw >> e.ty.frac()) as i64,
            Value::Float(x) => x as i64,
        })
    }

    pub(crate) fn eval(&self, e: &Expr) -> StageResult<Value> {
        let ty = &e.ty;
        Ok(match &e.kind {
            ExprKind::Int(v) => convert(Value::Int(*v as i128), &ValueType::Int(64), ty)?,
            ExprKind::Float(x) => convert(Value::Float(*x), &ValueType::Float(64), ty)?,
            ExprKind::Var(var) => match self.env.get(var) {
                Some(&v) => convert(Value::Int(v as i128), &ValueType::Int(64), ty)?,
                None => {
                    return Err(error(
                        ExecutionErrorKind::UnboundVariable,
                        format!("variable '{}' read before it was bound", self.kernel.var_name(*var)),
                    ))
                }
            },
            ExprKind::Load { tensor, indices } => {
                let (id, offset) = self.element(*tensor, indices)?;
                let array = self.array(id)?;
                let stored = if array.dtype().is_float() {
                    Value::Float(array.load_float(offset))
                } else {
                    Value::Int(array.load_raw(offset))
                };
                convert(stored, array.dtype(), ty)?
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                self.binary(*op, a, b, ty, &rhs.ty)?
            }
            ExprKind::Unary { op, operand } => match (op, self.eval(operand)?) {
                (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
                (UnaryOp::Neg, Value::Int(v)) => Value::Int(wrap(-v, ty)),
                (UnaryOp::BitNot, v) => Value::Int(wrap(!v.raw(), ty)),
            },
            ExprKind::Cmp { op, lhs, rhs } => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                let ord = match (a, b) {
                    (Value::Int(x), Value::Int(y)) => x.partial_cmp(&y),
                    _ => a.real(&lhs.ty).partial_cmp(&b.real(&rhs.ty)),
                };
                let holds = match ord {
                    Some(o) => match op {
                        CmpOp::Lt => o.is_lt(),
                        CmpOp::Le => o.is_le(),
                        CmpOp::Gt => o.is_gt(),
                        CmpOp::Ge => o.is_ge(),
                        CmpOp::Eq => o.is_eq(),
                        CmpOp::Ne => o.is_ne(),
                    },
                    // NaN compares unequal to everything
                    None => *op == CmpOp::Ne,
                };
                Value::Int(holds as i128)
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let a = self.eval(lhs)?.truthy();
                let result = match op {
                    LogicalOp::And => a && self.eval(rhs)?.truthy(),
                    LogicalOp::Or => a || self.eval(rhs)?.truthy(),
                };
                Value::Int(result as i128)
            }
            ExprKind::Not(inner) => Value::Int(!self.eval(inner)?.truthy() as i128),
            ExprKind::Select { cond, then_value, else_value } => {
                if self.eval(cond)?.truthy() {
                    convert(self.eval(then_value)?, &then_value.ty, ty)?
                } else {
                    convert(self.eval(else_value)?, &else_value.ty, ty)?
                }
            }
            ExprKind::Cast(inner) => convert(self.eval(inner)?, &inner.ty, ty)?,
            ExprKind::GetBit { value, index } => {
                let raw = self.eval(value)?.raw();
                let i = self.eval_index(index)?;
                if i < 0 || i >= value.bits() as i64 {
                    return Err(error(
                        ExecutionErrorKind::OutOfBounds,
                        format!("bit {} outside a {}-bit value", i, value.bits()),
                    ));
                }
                Value::Int((raw >> i) & 1)
            }
            ExprKind::GetSlice { value, lo, hi } => {
                let raw = self.eval(value)?.raw();
                let mask = (1i128 << (hi - lo)) - 1;
                Value::Int(wrap((raw >> lo) & mask, ty))
            }
            ExprKind::Reverse(inner) => {
                let width = inner.bits();
                let raw = self.eval(inner)?.raw();
                let reversed = (0..width).fold(0i128, |acc, b| acc | (((raw >> b) & 1) << (width - 1 - b)));
                Value::Int(wrap(reversed, ty))
            }
        })
    }

    fn binary(&self, op: BinaryOp, a: Value, b: Value, ty: &ValueType, rhs_ty: &ValueType) -> StageResult<Value> {
        if ty.is_float() {
            let (x, y) = (a.real(ty), b.real(rhs_ty));
            let r = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => {
                    return Err(error(
                        ExecutionErrorKind::UnsupportedWidth,
                        format!("bitwise '{}' on floating-point type '{}'", op.symbol(), ty),
                    ))
                }
            };
            return Ok(Value::Float(round_float(r, ty.bits())));
        }

        let (x, y) = (a.raw(), b.raw());
        let frac = ty.frac();
        let divisor = || {
            if y == 0 {
                Err(error(ExecutionErrorKind::DivisionByZero, format!("'{}' by zero", op.symbol())))
            } else {
                Ok(y)
            }
        };
        let r = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => (x * y) >> frac,
            BinaryOp::Div => (x << frac) / divisor()?,
            BinaryOp::Mod => x % divisor()?,
            BinaryOp::BitAnd => x & y,
            BinaryOp::BitOr => x | y,
            BinaryOp::BitXor => x ^ y,
            BinaryOp::Shl => match u32::try_from(y) {
                Ok(s) if s < 128 => x << s,
                _ => 0,
            },
            BinaryOp::Shr => match u32::try_from(y) {
                Ok(s) if s < 128 => x >> s,
                _ if x < 0 => -1,
                _ => 0,
            },
        };
        Ok(Value::Int(wrap(r, ty)))
    }
}

/// Check that every tensor of a kernel can be held by the evaluator.
pub(crate) fn check_kernel(kernel: &LoweredKernel) -> StageResult<()> {
    kernel.args().chain(kernel.locals()).try_for_each(|t| check_width(&t.dtype))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_rescales_fixed_point() {
        let fixed = ValueType::Fixed { bits: 16, frac: 4 };
        assert_eq!(convert(Value::Int(3), &ValueType::Int(32), &fixed).unwrap(), Value::Int(48));
        assert_eq!(convert(Value::Int(50), &fixed, &ValueType::Int(32)).unwrap(), Value::Int(3));
        assert_eq!(convert(Value::Int(40), &fixed, &ValueType::Float(32)).unwrap(), Value::Float(2.5));
        assert_eq!(convert(Value::Float(-1.5), &ValueType::Float(64), &fixed).unwrap(), Value::Int(-24));
    }

    #[test]
    fn test_convert_wraps_and_rounds() {
        assert_eq!(convert(Value::Int(300), &ValueType::Int(32), &ValueType::UInt(8)).unwrap(), Value::Int(44));
        assert_eq!(convert(Value::Int(-1), &ValueType::Int(32), &ValueType::UInt(4)).unwrap(), Value::Int(15));
        let x = convert(Value::Float(0.1), &ValueType::Float(64), &ValueType::Float(32)).unwrap();
        assert_eq!(x, Value::Float(0.1f32 as f64));
        let err = convert(Value::Int(1), &ValueType::Int(32), &ValueType::Int(96)).unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::UnsupportedWidth));
    }
}
