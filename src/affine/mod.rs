//! Affine bound algebra.
//!
//! Scheduling never manipulates loop bounds directly; it asks a [`BoundFolder`]
//! for the bounds that result from a transformation. [`AffineFolder`] is the
//! implementation used by the crate.

pub mod expr;
pub mod index;

pub use expr::AffineExpr;
pub use index::IndexExpr;

/// Contract for loop-bound folding.
pub trait BoundFolder {
    /// Canonicalize a bound.
    fn simplify(&self, bound: IndexExpr) -> IndexExpr;

    /// Number of iterations of `for v = lo to hi step step`.
    fn trip_count(&self, lo: &IndexExpr, hi: &IndexExpr, step: i64) -> IndexExpr;

    /// Extents after splitting an axis of `extent` iterations by `factor`:
    /// the outer extent, and the clipped inner extent at outer ordinal `outer`.
    fn split(&self, extent: &IndexExpr, factor: i64, outer: &IndexExpr) -> (IndexExpr, IndexExpr);

    /// Extent of fusing two axes; `None` when the inner extent is not constant.
    fn fuse(&self, outer_extent: &IndexExpr, inner_extent: &IndexExpr) -> Option<IndexExpr>;
}

/// Folds bounds with [`IndexExpr`]'s local simplifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineFolder;

impl BoundFolder for AffineFolder {
    fn simplify(&self, bound: IndexExpr) -> IndexExpr {
        bound.substitute(&Default::default())
    }

    fn trip_count(&self, lo: &IndexExpr, hi: &IndexExpr, step: i64) -> IndexExpr {
        if step > 0 {
            hi.clone().sub(lo.clone()).ceildiv(step)
        } else {
            lo.clone().sub(hi.clone()).ceildiv(-step)
        }
    }

    fn split(&self, extent: &IndexExpr, factor: i64, outer: &IndexExpr) -> (IndexExpr, IndexExpr) {
        let outer_extent = extent.clone().ceildiv(factor);
        let remaining = extent.clone().sub(outer.clone().mul(factor));
        (outer_extent, IndexExpr::constant(factor).min(remaining))
    }

    fn fuse(&self, outer_extent: &IndexExpr, inner_extent: &IndexExpr) -> Option<IndexExpr> {
        let inner = inner_extent.as_constant()?;
        Some(outer_extent.clone().mul(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarId;

    #[test]
    fn test_split_bounds() {
        let folder = AffineFolder;
        let outer = IndexExpr::var(VarId(1));
        let (oe, ie) = folder.split(&IndexExpr::constant(10), 3, &outer);
        assert_eq!(oe, IndexExpr::constant(4));
        assert_eq!(ie.to_string_with_names(&|_| "o".to_string()), "min(3, 10 - 3*o)");

        let (oe, ie) = folder.split(&IndexExpr::constant(12), 12, &outer);
        assert_eq!(oe, IndexExpr::constant(1));
        assert!(matches!(ie, IndexExpr::Min(..)));
    }

    #[test]
    fn test_trip_count() {
        let folder = AffineFolder;
        let c = IndexExpr::constant;
        assert_eq!(folder.trip_count(&c(0), &c(10), 1), c(10));
        assert_eq!(folder.trip_count(&c(0), &c(10), 3), c(4));
        assert_eq!(folder.trip_count(&c(10), &c(0), -4), c(3));
        let i = IndexExpr::var(VarId(0));
        assert_eq!(folder.trip_count(&i, &c(10), 1), c(10).sub(i));
    }

    #[test]
    fn test_fuse_requires_constant_inner() {
        let folder = AffineFolder;
        let c = IndexExpr::constant;
        assert_eq!(folder.fuse(&c(10), &c(20)), Some(c(200)));
        assert_eq!(folder.fuse(&c(10), &IndexExpr::var(VarId(0))), None);
    }
}
