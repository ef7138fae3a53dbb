//! Gas policy and per-block gas instrumentation.

use crate::error::CompileError;
use crate::instr::build_instr;
use crate::opcode::Opcode;
use crate::ssa::SsaFunctionCompiler;

/// Maps an opcode to its execution cost.
pub trait GasPolicy {
    fn cost_of(&self, op: Opcode) -> i64;
}

/// Flat cost per instruction, regardless of opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleGasPolicy {
    pub gas_per_instruction: i64,
}

impl GasPolicy for SimpleGasPolicy {
    fn cost_of(&self, _op: Opcode) -> i64 {
        self.gas_per_instruction
    }
}

impl<'m> SsaFunctionCompiler<'m> {
    /// Prepend an `add_gas` instruction to every block whose aggregate cost
    /// is positive, then re-linearize. A cost sum that wraps negative fails
    /// compilation.
    pub fn insert_gas_counters(&mut self, policy: &dyn GasPolicy) -> Result<(), CompileError> {
        let mut graph = self.new_cf_graph()?;

        for block in &mut graph.blocks {
            let mut total: i64 = 0;
            for ins in &block.code {
                total = total
                    .checked_add(policy.cost_of(ins.op))
                    .filter(|&cost| cost >= 0)
                    .ok_or(CompileError::GasCostOverflow)?;
            }
            if total > 0 {
                block
                    .code
                    .insert(0, build_instr(0, Opcode::AddGas, vec![total], vec![]));
            }
        }

        self.code = graph.to_ins_seq();
        Ok(())
    }

    /// Canonicalize through the control-flow graph without instrumentation.
    /// Used when no gas policy is configured.
    pub fn canonicalize(&mut self) -> Result<(), CompileError> {
        let graph = self.new_cf_graph()?;
        self.code = graph.to_ins_seq();
        Ok(())
    }
}
