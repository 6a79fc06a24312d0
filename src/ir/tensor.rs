//! Tensors and tensor views.

use super::expr::{Expr, TensorId};
use super::types::ValueType;
use crate::schedule::StageId;
use crate::utils::errors::{StageResult, TypeError, TypeErrorKind};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorKind {
    /// Kernel input
    Placeholder,
    /// Output of a `compute` stage
    Derived { stage: StageId },
    /// 0-dimensional mutable cell
    Scalar,
}

/// Schedule-side record of a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub id: TensorId,
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: ValueType,
    pub kind: TensorKind,
}

impl TensorInfo {
    pub fn handle(&self) -> Tensor {
        Tensor {
            id: self.id,
            name: self.name.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype.clone(),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().map(|&d| d.max(0) as usize).product()
    }
}

/// Handle to a tensor, used while tracing a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    id: TensorId,
    name: String,
    shape: Vec<i64>,
    dtype: ValueType,
}

impl Tensor {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn dtype(&self) -> &ValueType {
        &self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Read one element.
    pub fn at(&self, indices: &[Expr]) -> StageResult<Expr> {
        check_indices(&self.name, self.ndim(), indices)?;
        Ok(Expr::load(self.id, indices.to_vec(), self.dtype.clone()))
    }

    /// Fix the leading indices, leaving a view over the remaining dimensions.
    pub fn slice(&self, indices: &[Expr]) -> StageResult<TensorSlice> {
        TensorSlice { tensor: self.clone(), prefix: Vec::new() }.slice(indices)
    }

    /// Read a 0-dimensional tensor.
    pub fn value(&self) -> StageResult<Expr> {
        self.at(&[])
    }
}

/// A partially indexed tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSlice {
    tensor: Tensor,
    prefix: Vec<Expr>,
}

impl TensorSlice {
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Remaining dimensions.
    pub fn shape(&self) -> &[i64] {
        &self.tensor.shape[self.prefix.len()..]
    }

    pub fn at(&self, indices: &[Expr]) -> StageResult<Expr> {
        let full = self.full_indices(indices)?;
        Ok(Expr::load(self.tensor.id, full, self.tensor.dtype.clone()))
    }

    pub fn slice(&self, indices: &[Expr]) -> StageResult<TensorSlice> {
        if indices.len() > self.shape().len() {
            return Err(arity_error(&self.tensor.name, self.tensor.ndim(), self.prefix.len() + indices.len()));
        }
        check_index_types(&self.tensor.name, indices)?;
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(indices);
        Ok(TensorSlice { tensor: self.tensor.clone(), prefix })
    }

    fn full_indices(&self, indices: &[Expr]) -> StageResult<Vec<Expr>> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(indices);
        check_indices(&self.tensor.name, self.tensor.ndim(), &full)?;
        Ok(full)
    }
}

/// Anything that resolves an index list to a tensor element.
pub trait Indexable {
    /// The target tensor and the complete index list.
    fn resolve(&self, indices: &[Expr]) -> StageResult<(Tensor, Vec<Expr>)>;
}

impl Indexable for Tensor {
    fn resolve(&self, indices: &[Expr]) -> StageResult<(Tensor, Vec<Expr>)> {
        check_indices(&self.name, self.ndim(), indices)?;
        Ok((self.clone(), indices.to_vec()))
    }
}

impl Indexable for TensorSlice {
    fn resolve(&self, indices: &[Expr]) -> StageResult<(Tensor, Vec<Expr>)> {
        Ok((self.tensor.clone(), self.full_indices(indices)?))
    }
}

fn arity_error(name: &str, expected: usize, found: usize) -> crate::utils::errors::StageError {
    TypeError::new(
        TypeErrorKind::IndexArity,
        format!("tensor '{}' has {} dimensions, indexed with {}", name, expected, found),
    ).into()
}

fn check_index_types(name: &str, indices: &[Expr]) -> StageResult<()> {
    match indices.iter().find(|i| !i.ty.is_integer_like()) {
        Some(bad) => Err(TypeError::new(
            TypeErrorKind::NotIntegerLike,
            format!("index of tensor '{}' has non-integer type '{}'", name, bad.ty),
        ).into()),
        None => Ok(()),
    }
}

fn check_indices(name: &str, ndim: usize, indices: &[Expr]) -> StageResult<()> {
    if indices.len() != ndim {
        return Err(arity_error(name, ndim, indices.len()));
    }
    check_index_types(name, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ExprKind;

    fn tensor() -> Tensor {
        TensorInfo {
            id: TensorId(0),
            name: "A".into(),
            shape: vec![4, 5, 6],
            dtype: ValueType::UInt(8),
            kind: TensorKind::Placeholder,
        }
        .handle()
    }

    #[test]
    fn test_arity() {
        let a = tensor();
        assert!(a.at(&[Expr::int(0), Expr::int(1), Expr::int(2)]).is_ok());
        let err = a.at(&[Expr::int(0)]).unwrap_err();
        assert_eq!(err.type_kind(), Some(TypeErrorKind::IndexArity));
        assert_eq!(a.at(&[Expr::float(0.5), Expr::int(0), Expr::int(0)]).unwrap_err().type_kind(),
                   Some(TypeErrorKind::NotIntegerLike));
    }

    #[test]
    fn test_partial_indexing_concatenates() {
        let a = tensor();
        let row = a.slice(&[Expr::int(1)]).unwrap();
        assert_eq!(row.shape(), &[5, 6]);
        let e = row.slice(&[Expr::int(2)]).unwrap().at(&[Expr::int(3)]).unwrap();
        match e.kind {
            ExprKind::Load { indices, .. } => {
                let idx: Vec<i64> = indices.iter().filter_map(Expr::as_int).collect();
                assert_eq!(idx, vec![1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(e.ty, ValueType::UInt(8));
        assert!(row.at(&[Expr::int(0)]).is_err());
    }
}
