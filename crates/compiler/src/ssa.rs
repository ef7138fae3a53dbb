//! Stack-to-register lowering of a single Wasm function body.
//!
//! The compiler walks the operator stream once, maintaining a virtual
//! operand stack of SSA value ids and a stack of open control locations
//! (function body, blocks, loops, ifs). Every value-producing operator
//! defines a fresh id; structured control flow is flattened into `jmp`,
//! `jmp_if`, `jmp_either`, and `jmp_table` instructions whose targets are
//! instruction indices, patched through per-location fixup lists when the
//! enclosing construct closes.
//!
//! Value merges ride the interpreter's `yielded` slot: every edge into a
//! value-carrying merge point is an explicit jump that names the value it
//! carries, and the merge point itself is a `phi` that reads the slot. The
//! sets of ids that coexist on the operand stack (`stack_value_sets`) drive
//! the register allocator afterwards.

use crate::error::{CompileError, DecodeError};
use crate::instr::{build_instr, Instr, ValueId};
use crate::opcode::Opcode;
use crate::wasm::RawModule;
use std::collections::{BTreeMap, HashSet};
use wasmparser::{BlockType, MemArg, Operator};

/// A pending jump immediate to patch when its target becomes known.
#[derive(Debug, Clone, Copy)]
pub struct FixupInfo {
    pub code_pos: usize,
    pub table_pos: usize,
}

/// One open control construct.
#[derive(Debug, Default)]
pub struct Location {
    /// Index of the first instruction of the construct (for ifs, the
    /// `jmp_if`; for loops, the branch-back target).
    pub code_pos: usize,
    /// Operand stack depth at entry.
    pub stack_depth: usize,
    /// Branches target the head instead of the end (loops).
    pub br_head: bool,
    /// The construct leaves one value on the stack (blocks/ifs).
    pub preserve_top: bool,
    /// The construct leaves one value on the stack (loops).
    pub loop_preserve_top: bool,
    /// The construct is an `if`; its false edge lives at `code_pos + 1`.
    pub if_block: bool,
    pub fixup_list: Vec<FixupInfo>,
}

/// Translates one function body into register IR.
pub struct SsaFunctionCompiler<'m> {
    module: &'m RawModule,
    pub code: Vec<Instr>,
    stack: Vec<ValueId>,
    locations: Vec<Location>,
    /// Shift applied to `call` immediates so module-defined functions land
    /// past the import shims. Set by the module loader.
    pub call_index_offset: usize,
    /// Value ids observed together at each operand-stack depth.
    pub stack_value_sets: BTreeMap<usize, Vec<ValueId>>,
    used_value_ids: HashSet<ValueId>,
    value_id: ValueId,
    pub num_locals: usize,
    num_returns: usize,
    unreachable: bool,
    skip_depth: usize,
}

impl<'m> SsaFunctionCompiler<'m> {
    pub fn new(module: &'m RawModule, call_index_offset: usize) -> SsaFunctionCompiler<'m> {
        SsaFunctionCompiler {
            module,
            code: Vec::new(),
            stack: Vec::new(),
            locations: Vec::new(),
            call_index_offset,
            stack_value_sets: BTreeMap::new(),
            used_value_ids: HashSet::new(),
            value_id: 0,
            num_locals: 0,
            num_returns: 0,
            unreachable: false,
            skip_depth: 0,
        }
    }

    /// Lower module-defined function `func_index` into `self.code`.
    pub fn compile(
        &mut self,
        func_index: usize,
        import_type_ids: &[u32],
    ) -> Result<(), CompileError> {
        let type_id = self.module.func_type_ids[func_index] as usize;
        self.num_returns = self.module.types[type_id].results.len();

        let body = self.module.function_body(func_index);
        let mut locals = 0usize;
        for local in body.get_locals_reader()? {
            let (count, _ty) = local?;
            locals += count as usize;
        }
        self.num_locals = locals;

        self.locations.push(Location {
            code_pos: 0,
            stack_depth: 0,
            preserve_top: self.num_returns > 0,
            ..Location::default()
        });

        let mut reader = body.get_operators_reader()?;
        while !reader.eof() {
            let op = reader.read()?;
            self.lower_operator(&op, import_type_ids)?;
        }
        if !self.locations.is_empty() {
            return Err(CompileError::UnbalancedControl);
        }

        if self.num_returns > 0 {
            let value = self.pop1()?;
            self.emit(0, Opcode::ReturnValue, vec![], vec![value]);
        } else {
            self.emit(0, Opcode::ReturnVoid, vec![], vec![]);
        }
        Ok(())
    }

    /// Rewrite every floating-point opcode to a trap. Applied when the
    /// module is configured with floating point disabled.
    pub fn filter_floating_point(&mut self) {
        for ins in &mut self.code {
            if ins.op.is_floating_point() {
                *ins = build_instr(ins.target, Opcode::FPDisabledError, vec![], vec![]);
            }
        }
    }

    fn next_value_id(&mut self) -> ValueId {
        self.value_id += 1;
        self.value_id
    }

    fn emit(&mut self, target: ValueId, op: Opcode, immediates: Vec<i64>, values: Vec<ValueId>) {
        self.code.push(build_instr(target, op, immediates, values));
    }

    fn push_stack(&mut self, values: &[ValueId]) {
        for &value in values {
            assert!(
                self.used_value_ids.insert(value),
                "value id {value} pushed twice"
            );
            self.stack_value_sets
                .entry(self.stack.len())
                .or_default()
                .push(value);
            self.stack.push(value);
        }
    }

    fn pop_stack(&mut self, n: usize) -> Result<Vec<ValueId>, CompileError> {
        if self.stack.len() < n {
            return Err(CompileError::ValueStackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop1(&mut self) -> Result<ValueId, CompileError> {
        Ok(self.pop_stack(1)?[0])
    }

    fn peek(&self) -> Result<ValueId, CompileError> {
        self.stack
            .last()
            .copied()
            .ok_or(CompileError::ValueStackUnderflow)
    }

    fn set_unreachable(&mut self) {
        self.unreachable = true;
        self.skip_depth = 0;
    }

    /// Does this block type leave a value on the stack?
    fn block_yields(&self, blockty: BlockType) -> Result<bool, CompileError> {
        match blockty {
            BlockType::Empty => Ok(false),
            BlockType::Type(_) => Ok(true),
            BlockType::FuncType(index) => {
                let sig = self
                    .module
                    .types
                    .get(index as usize)
                    .ok_or(DecodeError::UnsupportedBlockType)?;
                if !sig.params.is_empty() || sig.results.len() > 1 {
                    return Err(DecodeError::UnsupportedBlockType.into());
                }
                Ok(sig.results.len() == 1)
            }
        }
    }

    /// Value carried by a branch to the location `depth` levels up: the
    /// stack top for value-yielding blocks, nothing for loop heads.
    fn branch_yield(&self, depth: u32) -> Result<ValueId, CompileError> {
        let index = self
            .locations
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(CompileError::UnbalancedControl)?;
        let location = &self.locations[index];
        if !location.br_head && location.preserve_top {
            self.peek()
        } else {
            Ok(0)
        }
    }

    fn add_branch_fixup(&mut self, depth: u32, fixup: FixupInfo) -> Result<(), CompileError> {
        let index = self
            .locations
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(CompileError::UnbalancedControl)?;
        self.locations[index].fixup_list.push(fixup);
        Ok(())
    }

    fn lower_operator(
        &mut self,
        op: &Operator<'_>,
        import_type_ids: &[u32],
    ) -> Result<(), CompileError> {
        if self.unreachable {
            match op {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                    self.skip_depth += 1;
                }
                Operator::Else if self.skip_depth == 0 => self.lower_else()?,
                Operator::End => {
                    if self.skip_depth > 0 {
                        self.skip_depth -= 1;
                    } else {
                        self.lower_end()?;
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match op {
            Operator::Nop => {}
            Operator::Unreachable => {
                self.emit(0, Opcode::Unreachable, vec![], vec![]);
                self.set_unreachable();
            }
            Operator::Drop => {
                self.pop_stack(1)?;
            }
            Operator::Select => {
                let values = self.pop_stack(3)?;
                let id = self.next_value_id();
                self.emit(id, Opcode::Select, vec![], values);
                self.push_stack(&[id]);
            }

            Operator::Block { blockty } => {
                let yields = self.block_yields(*blockty)?;
                self.locations.push(Location {
                    code_pos: self.code.len(),
                    stack_depth: self.stack.len(),
                    preserve_top: yields,
                    ..Location::default()
                });
            }
            Operator::Loop { blockty } => {
                let yields = self.block_yields(*blockty)?;
                self.locations.push(Location {
                    code_pos: self.code.len(),
                    stack_depth: self.stack.len(),
                    br_head: true,
                    loop_preserve_top: yields,
                    ..Location::default()
                });
            }
            Operator::If { blockty } => {
                let cond = self.pop1()?;
                let yields = self.block_yields(*blockty)?;
                let code_pos = self.code.len();
                self.locations.push(Location {
                    code_pos,
                    stack_depth: self.stack.len(),
                    preserve_top: yields,
                    if_block: true,
                    ..Location::default()
                });
                // True edge skips over the false-edge jump placed next.
                self.emit(
                    0,
                    Opcode::JmpIf,
                    vec![(code_pos + 2) as i64],
                    vec![cond, 0],
                );
                self.emit(0, Opcode::Jmp, vec![-1], vec![0]);
            }
            Operator::Else => self.lower_else()?,
            Operator::End => self.lower_end()?,

            Operator::Br { relative_depth } => {
                let yield_value = self.branch_yield(*relative_depth)?;
                let pos = self.code.len();
                self.emit(0, Opcode::Jmp, vec![-1], vec![yield_value]);
                self.add_branch_fixup(
                    *relative_depth,
                    FixupInfo {
                        code_pos: pos,
                        table_pos: 0,
                    },
                )?;
                self.set_unreachable();
            }
            Operator::BrIf { relative_depth } => {
                let cond = self.pop1()?;
                let yield_value = self.branch_yield(*relative_depth)?;
                let pos = self.code.len();
                self.emit(0, Opcode::JmpIf, vec![-1], vec![cond, yield_value]);
                self.add_branch_fixup(
                    *relative_depth,
                    FixupInfo {
                        code_pos: pos,
                        table_pos: 0,
                    },
                )?;
            }
            Operator::BrTable { targets } => {
                let cond = self.pop1()?;
                let mut depths = targets
                    .targets()
                    .collect::<Result<Vec<u32>, _>>()?;
                depths.push(targets.default());
                let yield_value = self.branch_yield(targets.default())?;
                let pos = self.code.len();
                self.emit(
                    0,
                    Opcode::JmpTable,
                    vec![-1; depths.len()],
                    vec![cond, yield_value],
                );
                for (table_pos, depth) in depths.iter().enumerate() {
                    self.add_branch_fixup(
                        *depth,
                        FixupInfo {
                            code_pos: pos,
                            table_pos,
                        },
                    )?;
                }
                self.set_unreachable();
            }
            Operator::Return => {
                if self.num_returns > 0 {
                    let value = self.peek()?;
                    self.emit(0, Opcode::ReturnValue, vec![], vec![value]);
                } else {
                    self.emit(0, Opcode::ReturnVoid, vec![], vec![]);
                }
                self.set_unreachable();
            }

            Operator::Call { function_index } => {
                let module = self.module;
                let index = *function_index as usize;
                let num_imports = import_type_ids.len();
                let (type_id, immediate) = if index < num_imports {
                    (import_type_ids[index] as usize, index as i64)
                } else {
                    let defined = index - num_imports;
                    let type_id = *module.func_type_ids.get(defined).ok_or_else(|| {
                        DecodeError::Parse(format!("call to unknown function {index}"))
                    })?;
                    (type_id as usize, (defined + self.call_index_offset) as i64)
                };
                let sig = module
                    .types
                    .get(type_id)
                    .ok_or_else(|| DecodeError::Parse(format!("unknown type {type_id}")))?;
                let has_result = !sig.results.is_empty();
                let args = self.pop_stack(sig.params.len())?;
                if has_result {
                    let id = self.next_value_id();
                    self.emit(id, Opcode::Call, vec![immediate], args);
                    self.push_stack(&[id]);
                } else {
                    self.emit(0, Opcode::Call, vec![immediate], args);
                }
            }
            Operator::CallIndirect { type_index, .. } => {
                let module = self.module;
                let sig = module
                    .types
                    .get(*type_index as usize)
                    .ok_or_else(|| DecodeError::Parse(format!("unknown type {type_index}")))?;
                let has_result = !sig.results.is_empty();
                // Arguments plus the table index, which was pushed last.
                let values = self.pop_stack(sig.params.len() + 1)?;
                if has_result {
                    let id = self.next_value_id();
                    self.emit(id, Opcode::CallIndirect, vec![*type_index as i64], values);
                    self.push_stack(&[id]);
                } else {
                    self.emit(0, Opcode::CallIndirect, vec![*type_index as i64], values);
                }
            }

            Operator::LocalGet { local_index } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::GetLocal, vec![*local_index as i64], vec![]);
                self.push_stack(&[id]);
            }
            Operator::LocalSet { local_index } => {
                let value = self.pop1()?;
                self.emit(0, Opcode::SetLocal, vec![*local_index as i64], vec![value]);
            }
            Operator::LocalTee { local_index } => {
                let value = self.peek()?;
                self.emit(0, Opcode::SetLocal, vec![*local_index as i64], vec![value]);
            }
            Operator::GlobalGet { global_index } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::GetGlobal, vec![*global_index as i64], vec![]);
                self.push_stack(&[id]);
            }
            Operator::GlobalSet { global_index } => {
                let value = self.pop1()?;
                self.emit(0, Opcode::SetGlobal, vec![*global_index as i64], vec![value]);
            }

            Operator::I32Const { value } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::I32Const, vec![*value as i64], vec![]);
                self.push_stack(&[id]);
            }
            Operator::I64Const { value } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::I64Const, vec![*value], vec![]);
                self.push_stack(&[id]);
            }
            // Registers are untyped; float constants are just bit patterns
            // carried by the integer const opcodes.
            Operator::F32Const { value } => {
                let id = self.next_value_id();
                self.emit(
                    id,
                    Opcode::I32Const,
                    vec![value.bits() as i32 as i64],
                    vec![],
                );
                self.push_stack(&[id]);
            }
            Operator::F64Const { value } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::I64Const, vec![value.bits() as i64], vec![]);
                self.push_stack(&[id]);
            }

            Operator::MemorySize { .. } => {
                let id = self.next_value_id();
                self.emit(id, Opcode::CurrentMemory, vec![], vec![]);
                self.push_stack(&[id]);
            }
            Operator::MemoryGrow { .. } => {
                let value = self.pop1()?;
                let id = self.next_value_id();
                self.emit(id, Opcode::GrowMemory, vec![], vec![value]);
                self.push_stack(&[id]);
            }

            Operator::I32Load { memarg } => self.emit_load(Opcode::I32Load, memarg)?,
            Operator::I64Load { memarg } => self.emit_load(Opcode::I64Load, memarg)?,
            Operator::I32Load8S { memarg } => self.emit_load(Opcode::I32Load8S, memarg)?,
            Operator::I32Load8U { memarg } => self.emit_load(Opcode::I32Load8U, memarg)?,
            Operator::I32Load16S { memarg } => self.emit_load(Opcode::I32Load16S, memarg)?,
            Operator::I32Load16U { memarg } => self.emit_load(Opcode::I32Load16U, memarg)?,
            Operator::I64Load8S { memarg } => self.emit_load(Opcode::I64Load8S, memarg)?,
            Operator::I64Load8U { memarg } => self.emit_load(Opcode::I64Load8U, memarg)?,
            Operator::I64Load16S { memarg } => self.emit_load(Opcode::I64Load16S, memarg)?,
            Operator::I64Load16U { memarg } => self.emit_load(Opcode::I64Load16U, memarg)?,
            Operator::I64Load32S { memarg } => self.emit_load(Opcode::I64Load32S, memarg)?,
            Operator::I64Load32U { memarg } => self.emit_load(Opcode::I64Load32U, memarg)?,
            Operator::I32Store { memarg } => self.emit_store(Opcode::I32Store, memarg)?,
            Operator::I64Store { memarg } => self.emit_store(Opcode::I64Store, memarg)?,
            Operator::I32Store8 { memarg } => self.emit_store(Opcode::I32Store8, memarg)?,
            Operator::I32Store16 { memarg } => self.emit_store(Opcode::I32Store16, memarg)?,
            Operator::I64Store8 { memarg } => self.emit_store(Opcode::I64Store8, memarg)?,
            Operator::I64Store16 { memarg } => self.emit_store(Opcode::I64Store16, memarg)?,
            Operator::I64Store32 { memarg } => self.emit_store(Opcode::I64Store32, memarg)?,

            Operator::I32Add => self.emit_binop(Opcode::I32Add)?,
            Operator::I32Sub => self.emit_binop(Opcode::I32Sub)?,
            Operator::I32Mul => self.emit_binop(Opcode::I32Mul)?,
            Operator::I32DivS => self.emit_binop(Opcode::I32DivS)?,
            Operator::I32DivU => self.emit_binop(Opcode::I32DivU)?,
            Operator::I32RemS => self.emit_binop(Opcode::I32RemS)?,
            Operator::I32RemU => self.emit_binop(Opcode::I32RemU)?,
            Operator::I32And => self.emit_binop(Opcode::I32And)?,
            Operator::I32Or => self.emit_binop(Opcode::I32Or)?,
            Operator::I32Xor => self.emit_binop(Opcode::I32Xor)?,
            Operator::I32Shl => self.emit_binop(Opcode::I32Shl)?,
            Operator::I32ShrS => self.emit_binop(Opcode::I32ShrS)?,
            Operator::I32ShrU => self.emit_binop(Opcode::I32ShrU)?,
            Operator::I32Rotl => self.emit_binop(Opcode::I32Rotl)?,
            Operator::I32Rotr => self.emit_binop(Opcode::I32Rotr)?,
            Operator::I32Clz => self.emit_unop(Opcode::I32Clz)?,
            Operator::I32Ctz => self.emit_unop(Opcode::I32Ctz)?,
            Operator::I32Popcnt => self.emit_unop(Opcode::I32PopCnt)?,
            Operator::I32Eqz => self.emit_unop(Opcode::I32EqZ)?,
            Operator::I32Eq => self.emit_binop(Opcode::I32Eq)?,
            Operator::I32Ne => self.emit_binop(Opcode::I32Ne)?,
            Operator::I32LtS => self.emit_binop(Opcode::I32LtS)?,
            Operator::I32LtU => self.emit_binop(Opcode::I32LtU)?,
            Operator::I32LeS => self.emit_binop(Opcode::I32LeS)?,
            Operator::I32LeU => self.emit_binop(Opcode::I32LeU)?,
            Operator::I32GtS => self.emit_binop(Opcode::I32GtS)?,
            Operator::I32GtU => self.emit_binop(Opcode::I32GtU)?,
            Operator::I32GeS => self.emit_binop(Opcode::I32GeS)?,
            Operator::I32GeU => self.emit_binop(Opcode::I32GeU)?,

            Operator::I64Add => self.emit_binop(Opcode::I64Add)?,
            Operator::I64Sub => self.emit_binop(Opcode::I64Sub)?,
            Operator::I64Mul => self.emit_binop(Opcode::I64Mul)?,
            Operator::I64DivS => self.emit_binop(Opcode::I64DivS)?,
            Operator::I64DivU => self.emit_binop(Opcode::I64DivU)?,
            Operator::I64RemS => self.emit_binop(Opcode::I64RemS)?,
            Operator::I64RemU => self.emit_binop(Opcode::I64RemU)?,
            Operator::I64And => self.emit_binop(Opcode::I64And)?,
            Operator::I64Or => self.emit_binop(Opcode::I64Or)?,
            Operator::I64Xor => self.emit_binop(Opcode::I64Xor)?,
            Operator::I64Shl => self.emit_binop(Opcode::I64Shl)?,
            Operator::I64ShrS => self.emit_binop(Opcode::I64ShrS)?,
            Operator::I64ShrU => self.emit_binop(Opcode::I64ShrU)?,
            Operator::I64Rotl => self.emit_binop(Opcode::I64Rotl)?,
            Operator::I64Rotr => self.emit_binop(Opcode::I64Rotr)?,
            Operator::I64Clz => self.emit_unop(Opcode::I64Clz)?,
            Operator::I64Ctz => self.emit_unop(Opcode::I64Ctz)?,
            Operator::I64Popcnt => self.emit_unop(Opcode::I64PopCnt)?,
            Operator::I64Eqz => self.emit_unop(Opcode::I64EqZ)?,
            Operator::I64Eq => self.emit_binop(Opcode::I64Eq)?,
            Operator::I64Ne => self.emit_binop(Opcode::I64Ne)?,
            Operator::I64LtS => self.emit_binop(Opcode::I64LtS)?,
            Operator::I64LtU => self.emit_binop(Opcode::I64LtU)?,
            Operator::I64LeS => self.emit_binop(Opcode::I64LeS)?,
            Operator::I64LeU => self.emit_binop(Opcode::I64LeU)?,
            Operator::I64GtS => self.emit_binop(Opcode::I64GtS)?,
            Operator::I64GtU => self.emit_binop(Opcode::I64GtU)?,
            Operator::I64GeS => self.emit_binop(Opcode::I64GeS)?,
            Operator::I64GeU => self.emit_binop(Opcode::I64GeU)?,

            Operator::F32Add => self.emit_binop(Opcode::F32Add)?,
            Operator::F32Sub => self.emit_binop(Opcode::F32Sub)?,
            Operator::F32Mul => self.emit_binop(Opcode::F32Mul)?,
            Operator::F32Div => self.emit_binop(Opcode::F32Div)?,
            Operator::F32Min => self.emit_binop(Opcode::F32Min)?,
            Operator::F32Max => self.emit_binop(Opcode::F32Max)?,
            Operator::F32Copysign => self.emit_binop(Opcode::F32CopySign)?,
            Operator::F32Sqrt => self.emit_unop(Opcode::F32Sqrt)?,
            Operator::F32Ceil => self.emit_unop(Opcode::F32Ceil)?,
            Operator::F32Floor => self.emit_unop(Opcode::F32Floor)?,
            Operator::F32Trunc => self.emit_unop(Opcode::F32Trunc)?,
            Operator::F32Nearest => self.emit_unop(Opcode::F32Nearest)?,
            Operator::F32Abs => self.emit_unop(Opcode::F32Abs)?,
            Operator::F32Neg => self.emit_unop(Opcode::F32Neg)?,
            Operator::F32Eq => self.emit_binop(Opcode::F32Eq)?,
            Operator::F32Ne => self.emit_binop(Opcode::F32Ne)?,
            Operator::F32Lt => self.emit_binop(Opcode::F32Lt)?,
            Operator::F32Le => self.emit_binop(Opcode::F32Le)?,
            Operator::F32Gt => self.emit_binop(Opcode::F32Gt)?,
            Operator::F32Ge => self.emit_binop(Opcode::F32Ge)?,

            Operator::F64Add => self.emit_binop(Opcode::F64Add)?,
            Operator::F64Sub => self.emit_binop(Opcode::F64Sub)?,
            Operator::F64Mul => self.emit_binop(Opcode::F64Mul)?,
            Operator::F64Div => self.emit_binop(Opcode::F64Div)?,
            Operator::F64Min => self.emit_binop(Opcode::F64Min)?,
            Operator::F64Max => self.emit_binop(Opcode::F64Max)?,
            Operator::F64Copysign => self.emit_binop(Opcode::F64CopySign)?,
            Operator::F64Sqrt => self.emit_unop(Opcode::F64Sqrt)?,
            Operator::F64Ceil => self.emit_unop(Opcode::F64Ceil)?,
            Operator::F64Floor => self.emit_unop(Opcode::F64Floor)?,
            Operator::F64Trunc => self.emit_unop(Opcode::F64Trunc)?,
            Operator::F64Nearest => self.emit_unop(Opcode::F64Nearest)?,
            Operator::F64Abs => self.emit_unop(Opcode::F64Abs)?,
            Operator::F64Neg => self.emit_unop(Opcode::F64Neg)?,
            Operator::F64Eq => self.emit_binop(Opcode::F64Eq)?,
            Operator::F64Ne => self.emit_binop(Opcode::F64Ne)?,
            Operator::F64Lt => self.emit_binop(Opcode::F64Lt)?,
            Operator::F64Le => self.emit_binop(Opcode::F64Le)?,
            Operator::F64Gt => self.emit_binop(Opcode::F64Gt)?,
            Operator::F64Ge => self.emit_binop(Opcode::F64Ge)?,

            Operator::I32WrapI64 => self.emit_unop(Opcode::I32WrapI64)?,
            Operator::I32TruncF32S => self.emit_unop(Opcode::I32TruncSF32)?,
            Operator::I32TruncF32U => self.emit_unop(Opcode::I32TruncUF32)?,
            Operator::I32TruncF64S => self.emit_unop(Opcode::I32TruncSF64)?,
            Operator::I32TruncF64U => self.emit_unop(Opcode::I32TruncUF64)?,
            Operator::I64TruncF32S => self.emit_unop(Opcode::I64TruncSF32)?,
            Operator::I64TruncF32U => self.emit_unop(Opcode::I64TruncUF32)?,
            Operator::I64TruncF64S => self.emit_unop(Opcode::I64TruncSF64)?,
            Operator::I64TruncF64U => self.emit_unop(Opcode::I64TruncUF64)?,
            Operator::I64ExtendI32S => self.emit_unop(Opcode::I64ExtendSI32)?,
            Operator::I64ExtendI32U => self.emit_unop(Opcode::I64ExtendUI32)?,
            Operator::F32DemoteF64 => self.emit_unop(Opcode::F32DemoteF64)?,
            Operator::F64PromoteF32 => self.emit_unop(Opcode::F64PromoteF32)?,
            Operator::F32ConvertI32S => self.emit_unop(Opcode::F32ConvertSI32)?,
            Operator::F32ConvertI32U => self.emit_unop(Opcode::F32ConvertUI32)?,
            Operator::F32ConvertI64S => self.emit_unop(Opcode::F32ConvertSI64)?,
            Operator::F32ConvertI64U => self.emit_unop(Opcode::F32ConvertUI64)?,
            Operator::F64ConvertI32S => self.emit_unop(Opcode::F64ConvertSI32)?,
            Operator::F64ConvertI32U => self.emit_unop(Opcode::F64ConvertUI32)?,
            Operator::F64ConvertI64S => self.emit_unop(Opcode::F64ConvertSI64)?,
            Operator::F64ConvertI64U => self.emit_unop(Opcode::F64ConvertUI64)?,

            other => {
                return Err(DecodeError::UnsupportedOperator(format!("{other:?}")).into());
            }
        }
        Ok(())
    }

    fn emit_binop(&mut self, op: Opcode) -> Result<(), CompileError> {
        let values = self.pop_stack(2)?;
        let id = self.next_value_id();
        self.emit(id, op, vec![], values);
        self.push_stack(&[id]);
        Ok(())
    }

    fn emit_unop(&mut self, op: Opcode) -> Result<(), CompileError> {
        let value = self.pop1()?;
        let id = self.next_value_id();
        self.emit(id, op, vec![], vec![value]);
        self.push_stack(&[id]);
        Ok(())
    }

    fn emit_load(&mut self, op: Opcode, memarg: &MemArg) -> Result<(), CompileError> {
        let offset = u32::try_from(memarg.offset)
            .map_err(|_| DecodeError::MemoryOffsetTooLarge(memarg.offset))?;
        let base = self.pop1()?;
        let id = self.next_value_id();
        self.emit(id, op, vec![memarg.align as i64, offset as i64], vec![base]);
        self.push_stack(&[id]);
        Ok(())
    }

    fn emit_store(&mut self, op: Opcode, memarg: &MemArg) -> Result<(), CompileError> {
        let offset = u32::try_from(memarg.offset)
            .map_err(|_| DecodeError::MemoryOffsetTooLarge(memarg.offset))?;
        let values = self.pop_stack(2)?;
        self.emit(0, op, vec![memarg.align as i64, offset as i64], values);
        Ok(())
    }

    fn lower_else(&mut self) -> Result<(), CompileError> {
        let index = self
            .locations
            .len()
            .checked_sub(1)
            .ok_or(CompileError::UnbalancedControl)?;
        if !self.locations[index].if_block {
            return Err(CompileError::UnbalancedControl);
        }
        let was_unreachable = self.unreachable;
        self.unreachable = false;

        let preserve_top = self.locations[index].preserve_top;
        let code_pos = self.locations[index].code_pos;
        let stack_depth = self.locations[index].stack_depth;

        if !was_unreachable {
            // Close the true branch with a jump to the merge point,
            // carrying its value when the construct yields one.
            let yield_value = if preserve_top { self.peek()? } else { 0 };
            let pos = self.code.len();
            self.emit(0, Opcode::Jmp, vec![-1], vec![yield_value]);
            self.locations[index].fixup_list.push(FixupInfo {
                code_pos: pos,
                table_pos: 0,
            });
        }

        // The false edge of the jmp_if lands at the else body.
        let false_jmp = code_pos + 1;
        self.code[false_jmp].immediates[0] = self.code.len() as i64;
        self.stack.truncate(stack_depth);
        Ok(())
    }

    fn lower_end(&mut self) -> Result<(), CompileError> {
        let location = self.locations.pop().ok_or(CompileError::UnbalancedControl)?;
        let was_unreachable = self.unreachable;
        self.unreachable = false;

        let yields = location.preserve_top || location.loop_preserve_top;
        if !was_unreachable && yields {
            let yield_value = self.peek()?;
            let next = (self.code.len() + 1) as i64;
            self.emit(0, Opcode::Jmp, vec![next], vec![yield_value]);
        }

        let mut fixups = location.fixup_list;
        if location.if_block {
            // An if with no else: its false edge joins the merge point.
            let false_jmp = location.code_pos + 1;
            if self.code[false_jmp].immediates[0] == -1 {
                fixups.push(FixupInfo {
                    code_pos: false_jmp,
                    table_pos: 0,
                });
            }
        }

        let target = if location.br_head {
            location.code_pos
        } else {
            self.code.len()
        } as i64;
        for fixup in &fixups {
            self.code[fixup.code_pos].immediates[fixup.table_pos] = target;
        }

        self.stack.truncate(location.stack_depth);
        if yields {
            let id = self.next_value_id();
            self.emit(id, Opcode::Phi, vec![], vec![]);
            self.push_stack(&[id]);
        }
        Ok(())
    }
}
