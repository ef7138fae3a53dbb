//! Runtime traps and exit reasons.
//!
//! A trap aborts the dispatch loop; the outermost `execute` guard converts
//! it into the machine's `exit_error`. Host-import panics are the only other
//! exit reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conditions that abort execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("signed integer overflow")]
    IntegerOverflow,

    /// `call_indirect` through an entry whose signature arity does not
    /// match the declared type.
    #[error("indirect call type mismatch")]
    TypeMismatch,

    #[error("call stack overflow")]
    CallStackOverflow,

    #[error("max value slot count exceeded")]
    MaxValueSlotsExceeded,

    #[error("memory access out of bounds")]
    MemoryOutOfBounds,

    /// Table index beyond the table's length.
    #[error("undefined table entry")]
    UndefinedTableEntry,

    /// Table slot never filled by an element segment.
    #[error("uninitialized table entry")]
    UninitializedTableEntry,

    #[error("global index out of bounds")]
    GlobalIndexOutOfBounds,

    #[error("gas overflow")]
    GasOverflow,

    #[error("gas limit exceeded")]
    GasLimitExceeded,

    #[error("floating point disabled")]
    FloatingPointDisabled,

    #[error("unknown instruction (opcode {0})")]
    UnknownInstruction(u8),
}

/// Why a machine exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ExitError {
    #[error(transparent)]
    Trap(#[from] Trap),

    /// A host import panicked; the payload is its message.
    #[error("host import panicked: {0}")]
    HostPanic(String),
}
