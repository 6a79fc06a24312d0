//! # PolyStage - staging and scheduling for affine loop kernels
//!
//! Kernels are written against an explicit builder: every loop and conditional
//! is opened and closed by a call, so tracing produces IR instead of running the
//! host program. The result is a [`Schedule`] of named stages whose loop axes
//! can be split, fused, reordered, unrolled and relocated before the schedule
//! is lowered to an affine loop nest.
//!
//! ## Architecture
//!
//! ```text
//! KernelBuilder → Schedule (stages, axes) → Transforms → Lowering → LoweredKernel
//!                                                                 ↘ runtime (reference evaluator)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use polystage::prelude::*;
//!
//! let config = BuildConfig::default();
//! let mut s = create_schedule(&config, "kernel", &[placeholder("A", &[10, 20])], |kb, ts| {
//!     let a = ts[0].clone();
//!     let b = kb.compute(&[10, 20], Some("B"), None, |_, i| Ok(a.at(i)? + 1))?;
//!     Ok(vec![b])
//! })?;
//!
//! let x = s.stage("B")?.axis(0)?;
//! let (outer, inner) = s.split(x, 3)?;
//! println!("{}", polystage::lower(&s)?);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod utils;
pub mod ir;
pub mod affine;
pub mod frontend;
pub mod schedule;
pub mod transform;
pub mod analysis;
pub mod codegen;
pub mod runtime;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::{BuildConfig, LoweringConfig, RuntimeConfig};
    pub use crate::frontend::{create_schedule, placeholder, KernelBuilder, PlaceholderSpec};
    pub use crate::ir::{get_bitwidth, Expr, Indexable, StructType, Tensor, TensorSlice, ValueType};
    pub use crate::schedule::{Axis, AxisId, Schedule, Stage, StageId};
    pub use crate::transform::{ComputeAt, Fuse, Reorder, Split, Transform, Unroll};
    pub use crate::codegen::{lower, AstNode, LoweredKernel};
    pub use crate::runtime::{build, Executable, HostArray};
    pub use crate::utils::errors::*;
}

pub use codegen::lower;
pub use config::BuildConfig;
pub use frontend::{create_schedule, placeholder};
pub use runtime::build;
pub use schedule::Schedule;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
