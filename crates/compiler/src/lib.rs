//! Wasm-to-register-IR compiler for the cinder engine.
//!
//! The pipeline for each module-defined function:
//!
//! 1. [`ssa`] — stack-to-register lowering of the operator stream
//! 2. [`cfg`] — basic-block partitioning and canonical linearization
//! 3. [`gas`] — per-block `add_gas` instrumentation
//! 4. [`regalloc`] — stack-residency register assignment
//! 5. [`serialize`] — little-endian interpreter byte encoding
//!
//! [`module::Module`] drives the pipeline over a whole binary, synthesizing
//! call shims for function imports and collecting debug names. Raw section
//! decoding (via `wasmparser`) lives in [`wasm`].

pub mod cfg;
pub mod error;
pub mod gas;
pub mod instr;
pub mod module;
pub mod opcode;
pub mod regalloc;
pub mod serialize;
pub mod ssa;
pub mod wasm;

pub use error::{CompileError, DecodeError};
pub use gas::{GasPolicy, SimpleGasPolicy};
pub use instr::{build_instr, Instr, ValueId};
pub use module::{InterpreterCode, Module};
pub use opcode::{Opcode, ALL_OPCODES};
pub use ssa::SsaFunctionCompiler;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Opcode byte decoding is total and agrees with re-encoding.
        #[test]
        fn opcode_byte_roundtrip(byte in any::<u8>()) {
            match Opcode::from_u8(byte) {
                Some(op) => prop_assert_eq!(op as u8, byte),
                None => prop_assert!(byte as usize >= ALL_OPCODES.len()),
            }
        }

        /// Serializing a single register-only instruction always produces
        /// the 5-byte header plus 4 bytes per operand.
        #[test]
        fn register_op_length(values in prop::collection::vec(1u64..16, 0..3)) {
            let ins = build_instr(1, Opcode::I64Add, vec![], values.clone());
            let bytes = serialize::serialize_code(&[ins]);
            prop_assert_eq!(bytes.len(), 5 + 4 * values.len());
        }
    }
}
