//! Expression IR.
//!
//! Expressions are immutable trees. Every node carries its result type; operands
//! of differing type are coerced to a common type when the node is built, so the
//! evaluator and the printers never have to re-derive types.

use super::types::ValueType;
use super::NameTable;
use crate::affine::AffineExpr;
use crate::utils::errors::{StageResult, TypeError, TypeErrorKind};
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a loop or index variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifier of a tensor (placeholder, derived tensor or scalar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    pub fn is_bitwise(self) -> bool {
        matches!(self, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Expression node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Integer literal, interpreted as a number of the node's type
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// Loop or index variable
    Var(VarId),
    /// Tensor element read; scalars use an empty index list
    Load { tensor: TensorId, indices: Vec<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Comparison, typed `uint1`
    Cmp { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Short-circuit logical operation, typed `uint1`
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Not(Box<Expr>),
    Select { cond: Box<Expr>, then_value: Box<Expr>, else_value: Box<Expr> },
    /// Conversion to the node's type
    Cast(Box<Expr>),
    /// Single bit, typed `uint1`
    GetBit { value: Box<Expr>, index: Box<Expr> },
    /// Bits `[lo, hi)` reinterpreted as the node's type
    GetSlice { value: Box<Expr>, lo: u32, hi: u32 },
    /// Bit reversal over the operand's full width
    Reverse(Box<Expr>),
}

/// A typed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: ValueType,
}

impl Expr {
    /// Integer literal typed `int32`, or `int64` when it does not fit.
    pub fn int(value: i64) -> Self {
        let ty = if i32::try_from(value).is_ok() { ValueType::Int(32) } else { ValueType::Int(64) };
        Self { kind: ExprKind::Int(value), ty }
    }

    pub fn typed_int(value: i64, ty: ValueType) -> Self {
        Self { kind: ExprKind::Int(value), ty }
    }

    pub fn float(value: f64) -> Self {
        Self { kind: ExprKind::Float(value), ty: ValueType::Float(64) }
    }

    pub fn var(var: VarId, ty: ValueType) -> Self {
        Self { kind: ExprKind::Var(var), ty }
    }

    pub(crate) fn load(tensor: TensorId, indices: Vec<Expr>, ty: ValueType) -> Self {
        Self { kind: ExprKind::Load { tensor, indices }, ty }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Int(v) if !self.ty.is_fixed() => Some(v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<VarId> {
        match self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Bit width of the result.
    pub fn bits(&self) -> u32 {
        self.ty.bits()
    }

    fn is_literal_for(&self, other: &ValueType) -> bool {
        match self.kind {
            ExprKind::Int(_) => true,
            ExprKind::Float(_) => other.is_float() || other.is_fixed(),
            _ => false,
        }
    }

    /// Convert to `ty`. Literals are retyped in place.
    pub fn cast(self, ty: ValueType) -> Expr {
        if self.ty == ty {
            return self;
        }
        match self.kind {
            ExprKind::Int(_) | ExprKind::Float(_) if !ty.is_struct() => Expr { kind: self.kind, ty },
            _ => Expr { kind: ExprKind::Cast(Box::new(self)), ty },
        }
    }

    /// Bring two operands to a common type.
    fn unify(lhs: Expr, rhs: Expr) -> (Expr, Expr, ValueType) {
        let ty = if lhs.ty == rhs.ty {
            lhs.ty.storage_type()
        } else if lhs.is_literal_for(&rhs.ty) && !rhs.is_literal_for(&lhs.ty) {
            rhs.ty.storage_type()
        } else if rhs.is_literal_for(&lhs.ty) && !lhs.is_literal_for(&rhs.ty) {
            lhs.ty.storage_type()
        } else {
            ValueType::promote(&lhs.ty, &rhs.ty)
        };
        (lhs.cast(ty.clone()), rhs.cast(ty.clone()), ty)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            let ty = lhs.ty.storage_type();
            let lhs = lhs.cast(ty.clone());
            return Expr { kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty };
        }
        let (lhs, rhs, ty) = Self::unify(lhs, rhs);
        Expr { kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty }
    }

    fn compare(&self, op: CmpOp, rhs: Expr) -> Expr {
        let (lhs, rhs, _) = Self::unify(self.clone(), rhs);
        Expr { kind: ExprKind::Cmp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty: ValueType::UInt(1) }
    }

    pub fn lt(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Lt, rhs.into())
    }

    pub fn le(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Le, rhs.into())
    }

    pub fn gt(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Gt, rhs.into())
    }

    pub fn ge(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Ge, rhs.into())
    }

    pub fn eq_(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Eq, rhs.into())
    }

    pub fn ne_(&self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Ne, rhs.into())
    }

    pub fn and_(&self, rhs: impl Into<Expr>) -> Expr {
        let kind = ExprKind::Logical { op: LogicalOp::And, lhs: Box::new(self.clone()), rhs: Box::new(rhs.into()) };
        Expr { kind, ty: ValueType::UInt(1) }
    }

    pub fn or_(&self, rhs: impl Into<Expr>) -> Expr {
        let kind = ExprKind::Logical { op: LogicalOp::Or, lhs: Box::new(self.clone()), rhs: Box::new(rhs.into()) };
        Expr { kind, ty: ValueType::UInt(1) }
    }

    pub fn not_(&self) -> Expr {
        Expr { kind: ExprKind::Not(Box::new(self.clone())), ty: ValueType::UInt(1) }
    }

    /// `cond ? then_value : else_value`
    pub fn select(cond: impl Into<Expr>, then_value: impl Into<Expr>, else_value: impl Into<Expr>) -> Expr {
        let (then_value, else_value, ty) = Self::unify(then_value.into(), else_value.into());
        let kind = ExprKind::Select {
            cond: Box::new(cond.into()),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        };
        Expr { kind, ty }
    }

    fn require_integer_like(&self, what: &str) -> StageResult<()> {
        if self.ty.is_integer_like() {
            Ok(())
        } else {
            Err(TypeError::new(
                TypeErrorKind::NotIntegerLike,
                format!("{} on non-integer type '{}'", what, self.ty),
            ).into())
        }
    }

    /// Read bit `index` (0 is the least significant bit).
    pub fn bit(&self, index: impl Into<Expr>) -> StageResult<Expr> {
        self.require_integer_like("bit access")?;
        let index = index.into();
        if let Some(i) = index.as_int() {
            self.ty.check_bit(i)?;
        }
        if !index.ty.is_integer_like() {
            return Err(TypeError::new(TypeErrorKind::NotIntegerLike, "bit index must be an integer").into());
        }
        let kind = ExprKind::GetBit { value: Box::new(self.clone()), index: Box::new(index) };
        Ok(Expr { kind, ty: ValueType::UInt(1) })
    }

    /// Read bits `[lo, hi)` as an unsigned value of width `hi - lo`.
    pub fn slice(&self, lo: u32, hi: u32) -> StageResult<Expr> {
        self.ty.check_slice(lo, hi)?;
        let kind = ExprKind::GetSlice { value: Box::new(self.clone()), lo, hi };
        Ok(Expr { kind, ty: ValueType::UInt(hi - lo) })
    }

    /// Reverse the bit order over the full width.
    pub fn reverse(&self) -> StageResult<Expr> {
        self.require_integer_like("reverse")?;
        Ok(Expr { kind: ExprKind::Reverse(Box::new(self.clone())), ty: self.ty.storage_type() })
    }

    /// Struct field access, a slice view over the field's packed range.
    pub fn field(&self, name: &str) -> StageResult<Expr> {
        let st = self.ty.as_struct().ok_or_else(|| {
            TypeError::new(
                TypeErrorKind::UnknownField,
                format!("field '{}' on non-struct type '{}'", name, self.ty),
            )
        })?;
        let field = st.field(name)?;
        let (lo, hi) = field.range();
        let kind = ExprKind::GetSlice { value: Box::new(self.clone()), lo, hi };
        Ok(Expr { kind, ty: field.ty.clone() })
    }

    /// Immediate sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Var(_) => Vec::new(),
            ExprKind::Load { indices, .. } => indices.iter().collect(),
            ExprKind::Binary { lhs, rhs, .. }
            | ExprKind::Cmp { lhs, rhs, .. }
            | ExprKind::Logical { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Not(e) | ExprKind::Cast(e) | ExprKind::Reverse(e) => vec![e],
            ExprKind::Select { cond, then_value, else_value } => vec![cond, then_value, else_value],
            ExprKind::GetBit { value, index } => vec![value, index],
            ExprKind::GetSlice { value, .. } => vec![value],
        }
    }

    /// Pre-order traversal.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Tensors read anywhere in this expression.
    pub fn reads(&self, out: &mut BTreeSet<TensorId>) {
        self.visit(&mut |e| {
            if let ExprKind::Load { tensor, .. } = e.kind {
                out.insert(tensor);
            }
        });
    }

    pub fn reads_tensor(&self, tensor: TensorId) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let ExprKind::Load { tensor: t, .. } = e.kind {
                found |= t == tensor;
            }
        });
        found
    }

    /// Index lists of every read of `tensor`.
    pub fn load_indices(&self, tensor: TensorId, out: &mut Vec<Vec<Expr>>) {
        self.visit(&mut |e| {
            if let ExprKind::Load { tensor: t, indices } = &e.kind {
                if *t == tensor {
                    out.push(indices.clone());
                }
            }
        });
    }

    /// The affine form of an integer index expression, if it has one.
    pub fn to_affine(&self) -> Option<AffineExpr> {
        match &self.kind {
            ExprKind::Int(v) if !self.ty.is_fixed() => Some(AffineExpr::constant(*v)),
            ExprKind::Var(v) => Some(AffineExpr::var(*v)),
            ExprKind::Binary { op: BinaryOp::Add, lhs, rhs } => Some(lhs.to_affine()? + rhs.to_affine()?),
            ExprKind::Binary { op: BinaryOp::Sub, lhs, rhs } => Some(lhs.to_affine()? - rhs.to_affine()?),
            ExprKind::Binary { op: BinaryOp::Mul, lhs, rhs } => {
                let (l, r) = (lhs.to_affine()?, rhs.to_affine()?);
                match (l.as_constant(), r.as_constant()) {
                    (Some(c), _) => Some(r.scale(c)),
                    (_, Some(c)) => Some(l.scale(c)),
                    _ => None,
                }
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => Some(-operand.to_affine()?),
            ExprKind::Cast(inner) if !self.ty.is_float() && !self.ty.is_fixed() => inner.to_affine(),
            _ => None,
        }
    }

    /// Render with names from `names`.
    pub fn render(&self, names: &dyn NameTable) -> String {
        match &self.kind {
            ExprKind::Int(v) => v.to_string(),
            ExprKind::Float(v) => format!("{:?}", v),
            ExprKind::Var(v) => format!("%{}", names.var_name(*v)),
            ExprKind::Load { tensor, indices } if indices.is_empty() => format!("%{}", names.tensor_name(*tensor)),
            ExprKind::Load { tensor, indices } => {
                let idx: Vec<String> = indices.iter().map(|i| i.render(names)).collect();
                format!("%{}[{}]", names.tensor_name(*tensor), idx.join(", "))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                format!("({} {} {})", lhs.render(names), op.symbol(), rhs.render(names))
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => format!("-{}", operand.render(names)),
            ExprKind::Unary { op: UnaryOp::BitNot, operand } => format!("~{}", operand.render(names)),
            ExprKind::Cmp { op, lhs, rhs } => {
                format!("({} {} {})", lhs.render(names), op.symbol(), rhs.render(names))
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let sym = if *op == LogicalOp::And { "&&" } else { "||" };
                format!("({} {} {})", lhs.render(names), sym, rhs.render(names))
            }
            ExprKind::Not(e) => format!("!{}", e.render(names)),
            ExprKind::Select { cond, then_value, else_value } => format!(
                "select({}, {}, {})",
                cond.render(names),
                then_value.render(names),
                else_value.render(names)
            ),
            ExprKind::Cast(e) => format!("cast<{}>({})", self.ty, e.render(names)),
            ExprKind::GetBit { value, index } => format!("{}[{}]", value.render(names), index.render(names)),
            ExprKind::GetSlice { value, lo, hi } => format!("{}[{}:{}]", value.render(names), lo, hi),
            ExprKind::Reverse(e) => format!("reverse({})", e.render(names)),
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::int(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::int(value as i64)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::float(value)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl std::ops::$trait<i64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                Expr::binary($op, self, Expr::int(rhs))
            }
        }

        impl std::ops::$trait<Expr> for i64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::int(self), rhs)
            }
        }

        impl<'a, 'b> std::ops::$trait<&'b Expr> for &'a Expr {
            type Output = Expr;
            fn $method(self, rhs: &'b Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }

        impl<'a> std::ops::$trait<i64> for &'a Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                Expr::binary($op, self.clone(), Expr::int(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);
impl_binary_op!(Rem, rem, BinaryOp::Mod);
impl_binary_op!(BitAnd, bitand, BinaryOp::BitAnd);
impl_binary_op!(BitOr, bitor, BinaryOp::BitOr);
impl_binary_op!(BitXor, bitxor, BinaryOp::BitXor);
impl_binary_op!(Shl, shl, BinaryOp::Shl);
impl_binary_op!(Shr, shr, BinaryOp::Shr);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        let ty = self.ty.storage_type();
        Expr { kind: ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(self.cast(ty.clone())) }, ty }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        let ty = self.ty.storage_type();
        Expr { kind: ExprKind::Unary { op: UnaryOp::BitNot, operand: Box::new(self.cast(ty.clone())) }, ty }
    }
}
