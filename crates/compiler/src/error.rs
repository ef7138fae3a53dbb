//! Errors raised while decoding a module or lowering its functions.

use crate::instr::ValueId;
use thiserror::Error;

/// Errors from decoding the raw Wasm binary into typed sections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The underlying binary reader rejected the module bytes.
    #[error("wasm parse error: {0}")]
    Parse(String),

    /// A signature uses a value type outside i32/i64/f32/f64.
    #[error("unsupported value type in signature")]
    UnsupportedValueType,

    /// A block type declares parameters or multiple results.
    #[error("unsupported block type")]
    UnsupportedBlockType,

    /// A function body contains an operator outside the supported set.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An import is neither a function, global, memory, nor table.
    #[error("unsupported import kind for '{module}.{field}'")]
    UnsupportedImportKind { module: String, field: String },

    /// More than one table section entry.
    #[error("multiple tables are not supported")]
    MultipleTables,

    /// More than one memory section entry.
    #[error("multiple memories are not supported")]
    MultipleMemories,

    /// An initializer expression uses operators outside the constant subset.
    #[error("malformed initializer expression")]
    MalformedInitExpr,

    /// A passive or expression-based element segment.
    #[error("unsupported element segment")]
    UnsupportedElementSegment,

    /// A passive data segment.
    #[error("unsupported data segment")]
    UnsupportedDataSegment,

    /// A load/store immediate offset outside the 32-bit address space.
    #[error("memory offset {0} exceeds the 32-bit address space")]
    MemoryOffsetTooLarge(u64),

    /// The `name` custom section is truncated or malformed.
    #[error("malformed name section: {0}")]
    MalformedNameSection(String),
}

impl From<wasmparser::BinaryReaderError> for DecodeError {
    fn from(err: wasmparser::BinaryReaderError) -> Self {
        DecodeError::Parse(err.to_string())
    }
}

impl From<wasmparser::BinaryReaderError> for CompileError {
    fn from(err: wasmparser::BinaryReaderError) -> Self {
        CompileError::Decode(err.into())
    }
}

/// Errors from the lowering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The aggregate gas cost of a basic block wrapped negative.
    #[error("total gas cost overflow")]
    GasCostOverflow,

    /// Register allocation found a value id with no assigned register.
    #[error("no register mapped for value {0}")]
    UnmappedRegister(ValueId),

    /// Lowering popped more operands than the virtual stack holds.
    #[error("operand stack underflow during lowering")]
    ValueStackUnderflow,

    /// `end`/`else` without a matching open control frame.
    #[error("mismatched control frames in function body")]
    UnbalancedControl,
}
