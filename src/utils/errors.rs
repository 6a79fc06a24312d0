//! Error types for the staging and scheduling core.
//!
//! Errors are organized by the phase that produces them. Every error aborts the
//! build of the kernel it was raised for; there is no partial IR.

use thiserror::Error;
use std::fmt;

/// Top-level error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Malformed control flow while tracing
    #[error("Scoping error: {0}")]
    Scope(#[from] ScopeError),

    /// Bit/slice range or struct field violations
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    /// Invalid schedule primitive
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Invariant violation discovered during the final walk
    #[error("Lowering error: {0}")]
    Lowering(#[from] LoweringError),

    /// Failure while interpreting a lowered kernel
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl StageError {
    /// The scoping error kind, if this is a scoping error.
    pub fn scope_kind(&self) -> Option<ScopeErrorKind> {
        match self {
            StageError::Scope(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The type error kind, if this is a type error.
    pub fn type_kind(&self) -> Option<TypeErrorKind> {
        match self {
            StageError::Type(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The schedule error kind, if this is a schedule error.
    pub fn schedule_kind(&self) -> Option<ScheduleErrorKind> {
        match self {
            StageError::Schedule(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The lowering error kind, if this is a lowering error.
    pub fn lowering_kind(&self) -> Option<LoweringErrorKind> {
        match self {
            StageError::Lowering(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The execution error kind, if this is an execution error.
    pub fn execution_kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            StageError::Execution(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Error raised while tracing control flow into IR.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ScopeError {
    /// The error message
    pub message: String,
    /// The kind of scoping error
    pub kind: ScopeErrorKind,
    /// Innermost open scope when the error was raised
    pub scope: Option<String>,
}

impl ScopeError {
    pub fn new(kind: ScopeErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind, scope: None }
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(ref scope) => write!(f, "{} (in {})", self.message, scope),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeErrorKind {
    /// `elif_` with no open chain at the current depth
    UnmatchedElif,
    /// `else_` with no open chain at the current depth
    UnmatchedElse,
    /// `end` with nothing to close
    UnmatchedEnd,
    /// A scope left open at the end of a body or kernel
    UnclosedScope,
    /// `break_` or any other early exit
    EarlyExit,
    /// Loop bound that is not affine in the enclosing induction variables
    NonAffineBound,
    /// Zero step or a step whose sign contradicts the bounds
    InvalidStep,
    /// Stage or tensor name used twice
    DuplicateName,
    /// The tracing context already failed
    Poisoned,
}

/// Error raised for bit widths, slices and struct fields.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct TypeError {
    /// The error message
    pub message: String,
    /// The kind of type error
    pub kind: TypeErrorKind,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeErrorKind {
    /// Bit index outside the declared width
    BitOutOfRange,
    /// Slice bounds outside the declared width or empty
    InvalidSlice,
    /// Unknown struct field or field access on a non-struct
    UnknownField,
    /// Bit-level access on a non-integer type
    NotIntegerLike,
    /// Wrong number of indices for a tensor
    IndexArity,
    /// Unparseable dtype string or invalid width
    InvalidType,
}

/// Error raised by a schedule primitive.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ScheduleError {
    /// The error message
    pub message: String,
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
    /// The primitive that failed
    pub transform: String,
    /// Stage the primitive was applied to
    pub stage: Option<String>,
}

impl ScheduleError {
    pub fn new(kind: ScheduleErrorKind, transform: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind, transform: transform.into(), stage: None }
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(ref stage) => write!(f, "{} in {} on stage '{}'", self.message, self.transform, stage),
            None => write!(f, "{} in {}", self.message, self.transform),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleErrorKind {
    /// Stage name not found
    UnknownStage,
    /// Axis does not belong to the stage
    UnknownAxis,
    /// Axis was already replaced by split/fuse
    ConsumedAxis,
    /// Fuse over axes that are not adjacent outer-then-inner
    NonAdjacentFuse,
    /// Split factor or unroll factor out of range
    InvalidFactor,
    /// Extent must be a compile-time constant here
    NonConstantExtent,
    /// Reorder with repeated axes
    DuplicateAxis,
    /// A bound would refer to a loop nested inside it
    BoundDependsOnInnerAxis,
    /// Stage already has a relocation target
    AlreadyRelocated,
    /// compute_at target cannot host the producer
    InvalidRelocation,
    /// Producer/consumer relation contains a cycle
    CyclicRelation,
}

/// Error raised while emitting the final loop nest.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct LoweringError {
    /// The error message
    pub message: String,
    /// The kind of lowering error
    pub kind: LoweringErrorKind,
}

impl LoweringError {
    pub fn new(kind: LoweringErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for LoweringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweringErrorKind {
    /// A relocated stage was never spliced, or spliced twice
    UnreachableRelocation,
    /// A loop bound refers to a variable that is not bound yet
    UnboundVariable,
    /// Stage graph visited a stage while it was being emitted
    Cycle,
    /// Schedule records are inconsistent
    Inconsistent,
}

/// Error raised by the reference evaluator.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ExecutionError {
    /// The error message
    pub message: String,
    /// The kind of execution error
    pub kind: ExecutionErrorKind,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Argument count, shape or dtype does not match the kernel
    ArgumentMismatch,
    /// Tensor access outside its shape
    OutOfBounds,
    /// Integer division or remainder by zero
    DivisionByZero,
    /// Value width the evaluator cannot represent
    UnsupportedWidth,
    /// While loop exceeded the configured iteration limit
    IterationLimit,
    /// Variable read before it was bound
    UnboundVariable,
}

/// Result type using StageError.
pub type StageResult<T> = Result<T, StageError>;
