//! Basic-block partitioning of a lowered instruction sequence.
//!
//! Label positions are: instruction 0, every jump target, the instruction
//! after any terminator, and one past the end. Each label starts a block;
//! falling into a label synthesizes an unconditional jump. `to_ins_seq`
//! linearizes the graph back into a flat sequence with instruction-index
//! jump immediates.

use crate::error::CompileError;
use crate::instr::{build_instr, Instr, ValueId};
use crate::opcode::Opcode;
use crate::ssa::SsaFunctionCompiler;
use std::collections::BTreeMap;

/// Terminator kind of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JmpKind {
    #[default]
    Undef,
    Uncond,
    Either,
    Table,
    Return,
}

/// A maximal straight-line run of non-terminator instructions.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub code: Vec<Instr>,
    pub jmp_kind: JmpKind,
    pub jmp_targets: Vec<usize>,
    pub jmp_cond: ValueId,
    pub yield_value: ValueId,
}

/// A control-flow graph over [`BasicBlock`]s.
#[derive(Debug, Clone, Default)]
pub struct CfGraph {
    pub blocks: Vec<BasicBlock>,
}

impl<'m> SsaFunctionCompiler<'m> {
    /// Partition the lowered sequence into basic blocks.
    pub fn new_cf_graph(&self) -> Result<CfGraph, CompileError> {
        let code = &self.code;
        let mut ins_labels: BTreeMap<usize, usize> = BTreeMap::new();
        ins_labels.insert(0, 0);
        let mut next_label = 1;
        let mut label = |labels: &mut BTreeMap<usize, usize>, pos: usize| {
            labels.entry(pos).or_insert_with(|| {
                let l = next_label;
                next_label += 1;
                l
            });
        };

        for (i, ins) in code.iter().enumerate() {
            match ins.op {
                Opcode::Jmp | Opcode::JmpIf | Opcode::JmpEither | Opcode::JmpTable => {
                    for &target in &ins.immediates {
                        label(&mut ins_labels, target as usize);
                    }
                    label(&mut ins_labels, i + 1);
                }
                Opcode::ReturnValue | Opcode::ReturnVoid => {
                    label(&mut ins_labels, i + 1);
                }
                _ => {}
            }
        }

        let mut graph = CfGraph {
            blocks: vec![BasicBlock::default(); next_label],
        };
        let mut current: Option<usize> = None;

        for (i, ins) in code.iter().enumerate() {
            if let Some(&entered) = ins_labels.get(&i) {
                // Fall-through into a labelled position.
                if let Some(open) = current {
                    graph.blocks[open].jmp_kind = JmpKind::Uncond;
                    graph.blocks[open].jmp_targets = vec![entered];
                }
                current = Some(entered);
            }
            let block_index = current.ok_or(CompileError::UnbalancedControl)?;
            let block = &mut graph.blocks[block_index];
            match ins.op {
                Opcode::Jmp => {
                    block.jmp_kind = JmpKind::Uncond;
                    block.jmp_targets = vec![ins_labels[&(ins.immediates[0] as usize)]];
                    block.yield_value = ins.values[0];
                    current = None;
                }
                Opcode::JmpIf => {
                    block.jmp_kind = JmpKind::Either;
                    block.jmp_targets = vec![
                        ins_labels[&(ins.immediates[0] as usize)],
                        ins_labels[&(i + 1)],
                    ];
                    block.jmp_cond = ins.values[0];
                    block.yield_value = ins.values[1];
                    current = None;
                }
                Opcode::JmpEither => {
                    block.jmp_kind = JmpKind::Either;
                    block.jmp_targets = vec![
                        ins_labels[&(ins.immediates[0] as usize)],
                        ins_labels[&(ins.immediates[1] as usize)],
                    ];
                    block.jmp_cond = ins.values[0];
                    block.yield_value = ins.values[1];
                    current = None;
                }
                Opcode::JmpTable => {
                    block.jmp_kind = JmpKind::Table;
                    block.jmp_targets = ins
                        .immediates
                        .iter()
                        .map(|&t| ins_labels[&(t as usize)])
                        .collect();
                    block.jmp_cond = ins.values[0];
                    block.yield_value = ins.values[1];
                    current = None;
                }
                Opcode::ReturnValue => {
                    block.jmp_kind = JmpKind::Return;
                    block.yield_value = ins.values[0];
                    current = None;
                }
                Opcode::ReturnVoid => {
                    block.jmp_kind = JmpKind::Return;
                    current = None;
                }
                _ => block.code.push(ins.clone()),
            }
        }

        // A trailing label (one past the end) closes as a void return.
        if let Some(&label) = ins_labels.get(&code.len()) {
            let last = &mut graph.blocks[label];
            debug_assert_eq!(last.jmp_kind, JmpKind::Undef);
            last.jmp_kind = JmpKind::Return;
        }

        Ok(graph)
    }
}

impl CfGraph {
    /// Linearize back into a flat sequence. Each block gets a one-slot
    /// terminator; block targets become instruction indices.
    pub fn to_ins_seq(&self) -> Vec<Instr> {
        let mut out: Vec<Instr> = Vec::new();
        let mut block_relocs = vec![0usize; self.blocks.len()];
        let mut block_ends = vec![0usize; self.blocks.len()];

        for (i, block) in self.blocks.iter().enumerate() {
            block_relocs[i] = out.len();
            out.extend(block.code.iter().cloned());
            out.push(build_instr(0, Opcode::Unknown, vec![], vec![]));
            block_ends[i] = out.len();
        }

        for (i, block) in self.blocks.iter().enumerate() {
            let jmp = &mut out[block_ends[i] - 1];
            jmp.immediates = block
                .jmp_targets
                .iter()
                .map(|&target| block_relocs[target] as i64)
                .collect();
            match block.jmp_kind {
                JmpKind::Undef => panic!("unfinalized block in control-flow graph"),
                JmpKind::Uncond => {
                    jmp.op = Opcode::Jmp;
                    jmp.values = vec![block.yield_value];
                }
                JmpKind::Either => {
                    jmp.op = Opcode::JmpEither;
                    jmp.values = vec![block.jmp_cond, block.yield_value];
                }
                JmpKind::Table => {
                    jmp.op = Opcode::JmpTable;
                    jmp.values = vec![block.jmp_cond, block.yield_value];
                }
                JmpKind::Return => {
                    if block.yield_value != 0 {
                        jmp.op = Opcode::ReturnValue;
                        jmp.values = vec![block.yield_value];
                    } else {
                        jmp.op = Opcode::ReturnVoid;
                    }
                }
            }
        }

        out
    }
}
