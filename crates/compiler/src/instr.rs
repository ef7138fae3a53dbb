//! The register IR instruction.

use crate::opcode::Opcode;
use std::fmt;

/// Identifier of an SSA value. 0 denotes "no value".
pub type ValueId = u64;

/// A single IR instruction.
///
/// `target` is the value defined by this instruction (0 for pure-effect
/// operations and terminators). `values` reference targets of strictly
/// earlier instructions in program order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub target: ValueId,
    pub op: Opcode,
    pub immediates: Vec<i64>,
    pub values: Vec<ValueId>,
}

/// Shorthand constructor used throughout the lowering passes.
pub fn build_instr(target: ValueId, op: Opcode, immediates: Vec<i64>, values: Vec<ValueId>) -> Instr {
    Instr {
        target,
        op,
        immediates,
        values,
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target != 0 {
            write!(f, "%{} = ", self.target)?;
        }
        write!(f, "{}", self.op.name())?;
        for imm in &self.immediates {
            write!(f, " #{imm}")?;
        }
        for value in &self.values {
            write!(f, " %{value}")?;
        }
        Ok(())
    }
}
