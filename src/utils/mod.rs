//! Utility modules.
//!
//! - Error types
//! - Pretty printing

pub mod errors;
pub mod pretty;

pub use errors::*;
pub use pretty::{CodeFormatter, PrettyPrint};
