//! Host-memory arrays.

use crate::ir::ValueType;
use crate::utils::errors::{ExecutionError, ExecutionErrorKind, StageResult};

/// Widest integer-like element the evaluator represents.
pub(crate) const MAX_WIDTH: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    /// Raw two's-complement bit patterns, one per element
    Bits(Vec<i64>),
    Float(Vec<f64>),
}

/// A dense row-major array tagged with its element type.
///
/// Integer-like elements (integers, fixed-point values and packed structs) are
/// kept as their raw bit pattern; fixed-point values are therefore scaled by
/// `2^frac`. Floats are kept as `f64`, rounded to their declared width.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    dtype: ValueType,
    shape: Vec<i64>,
    storage: Storage,
}

impl HostArray {
    /// A zero-filled array.
    pub fn new(dtype: ValueType, shape: &[i64]) -> StageResult<Self> {
        check_width(&dtype)?;
        let len = shape.iter().map(|&d| d.max(0) as usize).product();
        let storage = if dtype.is_float() { Storage::Float(vec![0.0; len]) } else { Storage::Bits(vec![0; len]) };
        Ok(Self { dtype, shape: shape.to_vec(), storage })
    }

    /// An array of integer values, wrapped to the element width. For
    /// fixed-point element types the values are taken as raw bit patterns.
    pub fn from_ints(dtype: ValueType, shape: &[i64], values: &[i64]) -> StageResult<Self> {
        let mut array = Self::new(dtype, shape)?;
        array.check_len(values.len())?;
        for (offset, &v) in values.iter().enumerate() {
            if array.dtype.is_float() {
                array.store_float(offset, v as f64);
            } else {
                array.store_raw(offset, v as i128);
            }
        }
        Ok(array)
    }

    /// An array of real values, converted to the element type: rounded for
    /// floats, scaled and truncated for fixed-point, truncated for integers.
    pub fn from_floats(dtype: ValueType, shape: &[i64], values: &[f64]) -> StageResult<Self> {
        let mut array = Self::new(dtype, shape)?;
        array.check_len(values.len())?;
        for (offset, &v) in values.iter().enumerate() {
            if array.dtype.is_float() {
                array.store_float(offset, v);
            } else {
                let scaled = (v * 2f64.powi(array.dtype.frac() as i32)).trunc();
                array.store_raw(offset, scaled as i128);
            }
        }
        Ok(array)
    }

    pub fn dtype(&self) -> &ValueType {
        &self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Bits(v) => v.len(),
            Storage::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element values as integers. Integer-like elements are sign- or
    /// zero-extended from their width; fixed-point elements are returned as raw
    /// bit patterns; floats are truncated.
    pub fn as_ints(&self) -> Vec<i64> {
        match &self.storage {
            Storage::Bits(v) => (0..v.len()).map(|i| self.load_raw(i) as i64).collect(),
            Storage::Float(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }

    /// Element values as reals; fixed-point elements are unscaled.
    pub fn as_floats(&self) -> Vec<f64> {
        match &self.storage {
            Storage::Bits(v) => {
                let scale = 2f64.powi(self.dtype.frac() as i32);
                (0..v.len()).map(|i| self.load_raw(i) as f64 / scale).collect()
            }
            Storage::Float(v) => v.clone(),
        }
    }

    /// Integer value of one element, see [`HostArray::as_ints`].
    pub fn get(&self, index: &[i64]) -> Option<i64> {
        let offset = self.offset(index)?;
        Some(match &self.storage {
            Storage::Bits(_) => self.load_raw(offset) as i64,
            Storage::Float(v) => v[offset] as i64,
        })
    }

    /// Row-major offset of an element, `None` when out of bounds.
    pub(crate) fn offset(&self, index: &[i64]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0usize;
        for (&i, &extent) in index.iter().zip(&self.shape) {
            if i < 0 || i >= extent {
                return None;
            }
            offset = offset * extent as usize + i as usize;
        }
        Some(offset)
    }

    /// Raw element value, extended according to the element type.
    pub(crate) fn load_raw(&self, offset: usize) -> i128 {
        match &self.storage {
            Storage::Bits(v) => wrap(v[offset] as i128, &self.dtype),
            Storage::Float(v) => v[offset] as i128,
        }
    }

    pub(crate) fn load_float(&self, offset: usize) -> f64 {
        match &self.storage {
            Storage::Float(v) => v[offset],
            Storage::Bits(v) => v[offset] as f64,
        }
    }

    pub(crate) fn store_raw(&mut self, offset: usize, raw: i128) {
        let value = wrap(raw, &self.dtype);
        match &mut self.storage {
            Storage::Bits(v) => v[offset] = value as i64,
            Storage::Float(v) => v[offset] = value as f64,
        }
    }

    pub(crate) fn store_float(&mut self, offset: usize, x: f64) {
        let x = round_float(x, self.dtype.bits());
        match &mut self.storage {
            Storage::Float(v) => v[offset] = x,
            Storage::Bits(v) => v[offset] = x as i64,
        }
    }

    fn check_len(&self, len: usize) -> StageResult<()> {
        if len != self.len() {
            return Err(ExecutionError::new(
                ExecutionErrorKind::ArgumentMismatch,
                format!("{} values given for an array of {} elements", len, self.len()),
            )
            .into());
        }
        Ok(())
    }
}

/// Reject element types the evaluator cannot hold.
pub(crate) fn check_width(dtype: &ValueType) -> StageResult<()> {
    let ok = match dtype {
        ValueType::Float(b) => matches!(b, 16 | 32 | 64),
        other => other.bits() <= MAX_WIDTH,
    };
    if ok {
        Ok(())
    } else {
        Err(ExecutionError::new(
            ExecutionErrorKind::UnsupportedWidth,
            format!("element type '{}' is wider than {} bits", dtype, MAX_WIDTH),
        )
        .into())
    }
}

/// Wrap `raw` to the width of `ty`, sign-extending signed types.
pub(crate) fn wrap(raw: i128, ty: &ValueType) -> i128 {
    let bits = ty.bits().min(MAX_WIDTH);
    if bits == 0 {
        return 0;
    }
    let mask = (1i128 << bits) - 1;
    let v = raw & mask;
    if ty.is_signed() && (v >> (bits - 1)) & 1 == 1 {
        v - (1i128 << bits)
    } else {
        v
    }
}

/// Round to the precision of a float of `bits` width.
pub(crate) fn round_float(x: f64, bits: u32) -> f64 {
    if bits <= 32 {
        x as f32 as f64
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_sign_extends() {
        assert_eq!(wrap(255, &ValueType::Int(8)), -1);
        assert_eq!(wrap(255, &ValueType::UInt(8)), 255);
        assert_eq!(wrap(256, &ValueType::UInt(8)), 0);
        assert_eq!(wrap(-1, &ValueType::UInt(64)), u64::MAX as i128);
        assert_eq!(wrap(5, &ValueType::UInt(1)), 1);
    }

    #[test]
    fn test_offsets_are_row_major() {
        let a = HostArray::new(ValueType::Int(32), &[2, 3]).unwrap();
        assert_eq!(a.offset(&[1, 2]), Some(5));
        assert_eq!(a.offset(&[2, 0]), None);
        assert_eq!(a.offset(&[0]), None);
        let s = HostArray::new(ValueType::Int(32), &[]).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.offset(&[]), Some(0));
    }

    #[test]
    fn test_conversions() {
        let a = HostArray::from_ints(ValueType::Int(4), &[3], &[7, 8, -9]).unwrap();
        assert_eq!(a.as_ints(), vec![7, -8, 7]);
        let f = HostArray::from_floats(ValueType::Fixed { bits: 8, frac: 2 }, &[2], &[1.5, -0.75]).unwrap();
        assert_eq!(f.as_ints(), vec![6, -3]);
        assert_eq!(f.as_floats(), vec![1.5, -0.75]);
        let err = HostArray::new(ValueType::UInt(65), &[1]).unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::UnsupportedWidth));
        let err = HostArray::from_ints(ValueType::Int(8), &[2], &[1]).unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::ArgumentMismatch));
    }
}
