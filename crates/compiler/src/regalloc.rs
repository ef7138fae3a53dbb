//! Coarse register allocation keyed by operand-stack residency.
//!
//! All value ids that ever coexisted at the same operand-stack depth share
//! one register; register 0 stays reserved as the "no value" slot. This is
//! deliberately imprecise — a liveness-based allocator would pack tighter —
//! but it is sound because the lowering threads every merge through an
//! explicit jump/phi pair.

use crate::error::CompileError;
use crate::instr::ValueId;
use crate::ssa::SsaFunctionCompiler;
use std::collections::HashMap;

impl<'m> SsaFunctionCompiler<'m> {
    /// Rewrite targets and operands from value ids to register indices.
    /// Returns the number of registers used (highest index + 1).
    pub fn reg_alloc(&mut self) -> Result<usize, CompileError> {
        let mut next_reg: ValueId = 1;
        let mut relocs: HashMap<ValueId, ValueId> = HashMap::new();

        for values in self.stack_value_sets.values() {
            for &value in values {
                relocs.insert(value, next_reg);
            }
            next_reg += 1;
        }

        for ins in &mut self.code {
            if ins.target != 0 {
                ins.target = *relocs
                    .get(&ins.target)
                    .ok_or(CompileError::UnmappedRegister(ins.target))?;
            }
            for value in &mut ins.values {
                if *value != 0 {
                    *value = *relocs
                        .get(value)
                        .ok_or(CompileError::UnmappedRegister(*value))?;
                }
            }
        }

        Ok(next_reg as usize)
    }
}
