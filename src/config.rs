//! Build configuration.
//!
//! One `BuildConfig` is passed to each kernel construction and stored in the
//! resulting schedule. There is no process-wide state.

use crate::ir::ValueType;
use serde::{Serialize, Deserialize};

/// Configuration for tracing, lowering and evaluation of one kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Element type of tensors created without an explicit dtype
    pub default_dtype: ValueType,

    /// Lowering options
    pub lowering: LoweringConfig,

    /// Reference evaluator options
    pub runtime: RuntimeConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            default_dtype: ValueType::Int(32),
            lowering: LoweringConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default element type
    pub fn default_dtype(mut self, dtype: ValueType) -> Self {
        self.default_dtype = dtype;
        self
    }

    /// Expand unrolled loops into straight-line copies
    pub fn materialize_unroll(mut self, enabled: bool) -> Self {
        self.lowering.materialize_unroll = enabled;
        self
    }

    /// Bound on `while` iterations in the reference evaluator
    pub fn max_while_iterations(mut self, limit: u64) -> Self {
        self.runtime.max_while_iterations = limit;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoweringConfig {
    /// Replace `unroll`-annotated loops by copies of their body when the trip
    /// count is constant; otherwise keep the annotation
    pub materialize_unroll: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub max_while_iterations: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_while_iterations: 1 << 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.default_dtype, ValueType::Int(32));
        assert!(!config.lowering.materialize_unroll);
        assert_eq!(config.runtime.max_while_iterations, 1 << 20);
    }

    #[test]
    fn test_builder() {
        let config = BuildConfig::new()
            .default_dtype(ValueType::UInt(8))
            .materialize_unroll(true)
            .max_while_iterations(16);
        assert_eq!(config.default_dtype, ValueType::UInt(8));
        assert!(config.lowering.materialize_unroll);
        assert_eq!(config.runtime.max_while_iterations, 16);
    }
}
