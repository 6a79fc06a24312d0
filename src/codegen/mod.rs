//! Lowering of a scheduled kernel to an explicit loop nest.
//!
//! - `ast`: the lowered loop-nest IR
//! - `ast_builder`: the walk from a [`Schedule`] to a [`LoweredKernel`]
//! - `printer`: affine-dialect text for a lowered kernel

pub mod ast;
pub mod ast_builder;
pub mod printer;
mod unroll;

pub use ast::{AstFor, AstNode, LoweredKernel, TensorRole};
pub use ast_builder::AstBuilder;

use crate::schedule::Schedule;
use crate::utils::errors::StageResult;

/// Lower a schedule into a loop nest.
///
/// Lowering does not modify the schedule; it may be called repeatedly, also
/// between schedule primitives.
pub fn lower(schedule: &Schedule) -> StageResult<LoweredKernel> {
    AstBuilder::new(schedule).build()
}
