//! Intermediate representation produced by tracing.
//!
//! - `types`: bit-precise value types
//! - `expr`: typed expression trees
//! - `stmt`: statements and blocks
//! - `tensor`: tensors, tensor views and their schedule records

pub mod types;
pub mod expr;
pub mod stmt;
pub mod tensor;

pub use types::{get_bitwidth, StructField, StructType, ValueType};
pub use expr::{BinaryOp, CmpOp, Expr, ExprKind, LogicalOp, TensorId, UnaryOp, VarId};
pub use stmt::{storage_root, Block, ForLoop, IfChain, Stmt};
pub use tensor::{Indexable, Tensor, TensorInfo, TensorKind, TensorSlice};

use serde::{Serialize, Deserialize};

/// Name and type of a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub ty: ValueType,
}

/// Resolves identifiers to printable names.
pub trait NameTable {
    fn var_name(&self, var: VarId) -> String;
    fn tensor_name(&self, tensor: TensorId) -> String;
}
