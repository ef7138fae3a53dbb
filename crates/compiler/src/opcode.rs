//! The closed opcode set of the register IR.
//!
//! Every compiled function body is a sequence of these operations. The
//! interpreter's dispatch is exhaustive over this enum; the byte value of a
//! variant is its position in the declaration order, which is also the value
//! written by the serializer.

/// One IR operation.
///
/// Sub-word loads and stores carry the post-load extension in the variant;
/// truncation pairs that differ only in signedness share a runtime handler.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Primitives
    /// No operation.
    Nop,
    /// Trap unconditionally.
    Unreachable,
    /// Pick the first operand when the third is nonzero, else the second.
    Select,

    // i32 arithmetic and bit ops. Operands are the low 32 bits of the
    // register; results are stored sign-extended.
    /// Load a 32-bit constant (also carries f32 bit patterns).
    I32Const,
    I32Add,
    I32Sub,
    I32Mul,
    /// Signed division; traps on zero and on MIN / -1.
    I32DivS,
    /// Unsigned division; traps on zero.
    I32DivU,
    /// Signed remainder; traps on zero. MIN rem -1 is 0.
    I32RemS,
    /// Unsigned remainder; traps on zero.
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    /// Shift left; the amount is masked to the low 5 bits.
    I32Shl,
    /// Arithmetic (sign-filling) shift right; masked amount.
    I32ShrS,
    /// Logical (zero-filling) shift right; masked amount.
    I32ShrU,
    /// Rotate toward the high bit.
    I32Rotl,
    /// Rotate toward the low bit.
    I32Rotr,
    /// Count leading zero bits.
    I32Clz,
    /// Count trailing zero bits.
    I32Ctz,
    /// Count set bits.
    I32PopCnt,

    // i32 comparisons. All produce 1 or 0 in the target register.
    /// 1 if the operand is zero.
    I32EqZ,
    I32Eq,
    I32Ne,
    /// Signed less-than.
    I32LtS,
    /// Unsigned less-than.
    I32LtU,
    /// Signed less-or-equal.
    I32LeS,
    /// Unsigned less-or-equal.
    I32LeU,
    /// Signed greater-than.
    I32GtS,
    /// Unsigned greater-than.
    I32GtU,
    /// Signed greater-or-equal.
    I32GeS,
    /// Unsigned greater-or-equal.
    I32GeU,

    // i64 arithmetic, bit ops, and comparisons; as the i32 forms but on
    // the full register width.
    /// Load a 64-bit constant (also carries f64 bit patterns).
    I64Const,
    I64Add,
    I64Sub,
    I64Mul,
    /// Signed division; traps on zero and on MIN / -1.
    I64DivS,
    /// Unsigned division; traps on zero.
    I64DivU,
    /// Signed remainder; traps on zero. MIN rem -1 is 0.
    I64RemS,
    /// Unsigned remainder; traps on zero.
    I64RemU,
    /// Rotate toward the high bit.
    I64Rotl,
    /// Rotate toward the low bit.
    I64Rotr,
    /// Count leading zero bits.
    I64Clz,
    /// Count trailing zero bits.
    I64Ctz,
    /// Count set bits.
    I64PopCnt,
    /// 1 if the operand is zero.
    I64EqZ,
    I64And,
    I64Or,
    I64Xor,
    /// Shift left; the amount is masked to the low 6 bits.
    I64Shl,
    /// Arithmetic (sign-filling) shift right; masked amount.
    I64ShrS,
    /// Logical (zero-filling) shift right; masked amount.
    I64ShrU,
    I64Eq,
    I64Ne,
    /// Signed less-than.
    I64LtS,
    /// Unsigned less-than.
    I64LtU,
    /// Signed less-or-equal.
    I64LeS,
    /// Unsigned less-or-equal.
    I64LeU,
    /// Signed greater-than.
    I64GtS,
    /// Unsigned greater-than.
    I64GtU,
    /// Signed greater-or-equal.
    I64GeS,
    /// Unsigned greater-or-equal.
    I64GeU,

    // f32 arithmetic and comparisons. Values travel as bit patterns in
    // the low 32 bits of the register; comparisons produce 1 or 0.
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Sqrt,
    /// NaN-propagating minimum; -0 orders below +0.
    F32Min,
    /// NaN-propagating maximum; -0 orders below +0.
    F32Max,
    F32Ceil,
    F32Floor,
    /// Round toward zero.
    F32Trunc,
    /// Round to nearest, ties to even.
    F32Nearest,
    F32Abs,
    F32Neg,
    /// First operand's magnitude with the second operand's sign.
    F32CopySign,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Le,
    F32Gt,
    F32Ge,

    // f64 arithmetic and comparisons; as the f32 forms on the full width.
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Sqrt,
    /// NaN-propagating minimum; -0 orders below +0.
    F64Min,
    /// NaN-propagating maximum; -0 orders below +0.
    F64Max,
    F64Ceil,
    F64Floor,
    /// Round toward zero.
    F64Trunc,
    /// Round to nearest, ties to even.
    F64Nearest,
    F64Abs,
    F64Neg,
    /// First operand's magnitude with the second operand's sign.
    F64CopySign,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Le,
    F64Gt,
    F64Ge,

    // Conversions. The signed/unsigned truncation pairs share a runtime
    // handler; lowering picked the operand type.
    /// Take the low 32 bits of an i64.
    I32WrapI64,
    /// Truncate an f32 toward zero to i32 (unsigned operand).
    I32TruncUF32,
    /// Truncate an f64 toward zero to i32 (unsigned operand).
    I32TruncUF64,
    /// Truncate an f32 toward zero to i32 (signed operand).
    I32TruncSF32,
    /// Truncate an f64 toward zero to i32 (signed operand).
    I32TruncSF64,
    /// Truncate an f32 toward zero to i64 (unsigned operand).
    I64TruncUF32,
    /// Truncate an f64 toward zero to i64 (unsigned operand).
    I64TruncUF64,
    /// Truncate an f32 toward zero to i64 (signed operand).
    I64TruncSF32,
    /// Truncate an f64 toward zero to i64 (signed operand).
    I64TruncSF64,
    /// Zero-extend the low 32 bits to i64.
    I64ExtendUI32,
    /// Sign-extend the low 32 bits to i64.
    I64ExtendSI32,
    /// Narrow an f64 to f32.
    F32DemoteF64,
    /// Widen an f32 to f64.
    F64PromoteF32,
    /// Signed i32 to f32.
    F32ConvertSI32,
    /// Signed i64 to f32.
    F32ConvertSI64,
    /// Unsigned i32 to f32.
    F32ConvertUI32,
    /// Unsigned i64 to f32.
    F32ConvertUI64,
    /// Signed i32 to f64.
    F64ConvertSI32,
    /// Signed i64 to f64.
    F64ConvertSI64,
    /// Unsigned i32 to f64.
    F64ConvertUI32,
    /// Unsigned i64 to f64.
    F64ConvertUI64,

    // Memory access. The effective address is base + immediate offset as
    // u64; sub-word loads carry their extension in the variant.
    /// Load 32 bits, sign-extended into the register.
    I32Load,
    /// Load 64 bits.
    I64Load,
    /// Store the low 32 bits.
    I32Store,
    /// Store 64 bits.
    I64Store,
    /// Load 8 bits, sign-extended.
    I32Load8S,
    /// Load 16 bits, sign-extended.
    I32Load16S,
    /// Load 8 bits, sign-extended.
    I64Load8S,
    /// Load 16 bits, sign-extended.
    I64Load16S,
    /// Load 32 bits, sign-extended.
    I64Load32S,
    /// Load 8 bits, zero-extended.
    I32Load8U,
    /// Load 16 bits, zero-extended.
    I32Load16U,
    /// Load 8 bits, zero-extended.
    I64Load8U,
    /// Load 16 bits, zero-extended.
    I64Load16U,
    /// Load 32 bits, zero-extended.
    I64Load32U,
    /// Store the low 8 bits.
    I32Store8,
    /// Store the low 16 bits.
    I32Store16,
    /// Store the low 8 bits.
    I64Store8,
    /// Store the low 16 bits.
    I64Store16,
    /// Store the low 32 bits.
    I64Store32,

    // Control. Jumps copy a named register into the machine's yielded
    // slot, where a `phi` at the merge point picks it up.
    /// Unconditional jump.
    Jmp,
    /// Jump when the condition register is nonzero, else fall through.
    JmpIf,
    /// Jump to the first target when the condition is nonzero, else the
    /// second.
    JmpEither,
    /// Indexed jump: targets[cond] when in range, else the default.
    JmpTable,
    /// Pop the frame, writing one register into the caller's return slot.
    ReturnValue,
    /// Pop the frame with no result.
    ReturnVoid,

    // Locals, globals, calls.
    /// Read a parameter or local into the target register.
    GetLocal,
    /// Write a register into a parameter or local.
    SetLocal,
    /// Read a module global.
    GetGlobal,
    /// Write a module global.
    SetGlobal,
    /// Call by function id; arguments become the callee's first locals.
    Call,
    /// Call through the table; arity-checked against the declared type.
    CallIndirect,
    /// Suspend for a host import; the driver resumes with its return
    /// value in the target register.
    InvokeImport,

    // Memory management and bookkeeping.
    /// Current linear-memory size in pages.
    CurrentMemory,
    /// Grow memory by n pages; yields the old page count, or -1.
    GrowMemory,
    /// Project the yielded slot into the target register at a merge.
    Phi,
    /// Charge the enclosing block's aggregate gas cost.
    AddGas,
    /// Trap: the module was compiled with floating point disabled.
    FPDisabledError,
    /// Never emitted; decodes of stray bytes trap.
    Unknown,
}

/// All opcodes in declaration (and byte-value) order.
pub const ALL_OPCODES: [Opcode; 162] = [
    Opcode::Nop,
    Opcode::Unreachable,
    Opcode::Select,
    Opcode::I32Const,
    Opcode::I32Add,
    Opcode::I32Sub,
    Opcode::I32Mul,
    Opcode::I32DivS,
    Opcode::I32DivU,
    Opcode::I32RemS,
    Opcode::I32RemU,
    Opcode::I32And,
    Opcode::I32Or,
    Opcode::I32Xor,
    Opcode::I32Shl,
    Opcode::I32ShrS,
    Opcode::I32ShrU,
    Opcode::I32Rotl,
    Opcode::I32Rotr,
    Opcode::I32Clz,
    Opcode::I32Ctz,
    Opcode::I32PopCnt,
    Opcode::I32EqZ,
    Opcode::I32Eq,
    Opcode::I32Ne,
    Opcode::I32LtS,
    Opcode::I32LtU,
    Opcode::I32LeS,
    Opcode::I32LeU,
    Opcode::I32GtS,
    Opcode::I32GtU,
    Opcode::I32GeS,
    Opcode::I32GeU,
    Opcode::I64Const,
    Opcode::I64Add,
    Opcode::I64Sub,
    Opcode::I64Mul,
    Opcode::I64DivS,
    Opcode::I64DivU,
    Opcode::I64RemS,
    Opcode::I64RemU,
    Opcode::I64Rotl,
    Opcode::I64Rotr,
    Opcode::I64Clz,
    Opcode::I64Ctz,
    Opcode::I64PopCnt,
    Opcode::I64EqZ,
    Opcode::I64And,
    Opcode::I64Or,
    Opcode::I64Xor,
    Opcode::I64Shl,
    Opcode::I64ShrS,
    Opcode::I64ShrU,
    Opcode::I64Eq,
    Opcode::I64Ne,
    Opcode::I64LtS,
    Opcode::I64LtU,
    Opcode::I64LeS,
    Opcode::I64LeU,
    Opcode::I64GtS,
    Opcode::I64GtU,
    Opcode::I64GeS,
    Opcode::I64GeU,
    Opcode::F32Add,
    Opcode::F32Sub,
    Opcode::F32Mul,
    Opcode::F32Div,
    Opcode::F32Sqrt,
    Opcode::F32Min,
    Opcode::F32Max,
    Opcode::F32Ceil,
    Opcode::F32Floor,
    Opcode::F32Trunc,
    Opcode::F32Nearest,
    Opcode::F32Abs,
    Opcode::F32Neg,
    Opcode::F32CopySign,
    Opcode::F32Eq,
    Opcode::F32Ne,
    Opcode::F32Lt,
    Opcode::F32Le,
    Opcode::F32Gt,
    Opcode::F32Ge,
    Opcode::F64Add,
    Opcode::F64Sub,
    Opcode::F64Mul,
    Opcode::F64Div,
    Opcode::F64Sqrt,
    Opcode::F64Min,
    Opcode::F64Max,
    Opcode::F64Ceil,
    Opcode::F64Floor,
    Opcode::F64Trunc,
    Opcode::F64Nearest,
    Opcode::F64Abs,
    Opcode::F64Neg,
    Opcode::F64CopySign,
    Opcode::F64Eq,
    Opcode::F64Ne,
    Opcode::F64Lt,
    Opcode::F64Le,
    Opcode::F64Gt,
    Opcode::F64Ge,
    Opcode::I32WrapI64,
    Opcode::I32TruncUF32,
    Opcode::I32TruncUF64,
    Opcode::I32TruncSF32,
    Opcode::I32TruncSF64,
    Opcode::I64TruncUF32,
    Opcode::I64TruncUF64,
    Opcode::I64TruncSF32,
    Opcode::I64TruncSF64,
    Opcode::I64ExtendUI32,
    Opcode::I64ExtendSI32,
    Opcode::F32DemoteF64,
    Opcode::F64PromoteF32,
    Opcode::F32ConvertSI32,
    Opcode::F32ConvertSI64,
    Opcode::F32ConvertUI32,
    Opcode::F32ConvertUI64,
    Opcode::F64ConvertSI32,
    Opcode::F64ConvertSI64,
    Opcode::F64ConvertUI32,
    Opcode::F64ConvertUI64,
    Opcode::I32Load,
    Opcode::I64Load,
    Opcode::I32Store,
    Opcode::I64Store,
    Opcode::I32Load8S,
    Opcode::I32Load16S,
    Opcode::I64Load8S,
    Opcode::I64Load16S,
    Opcode::I64Load32S,
    Opcode::I32Load8U,
    Opcode::I32Load16U,
    Opcode::I64Load8U,
    Opcode::I64Load16U,
    Opcode::I64Load32U,
    Opcode::I32Store8,
    Opcode::I32Store16,
    Opcode::I64Store8,
    Opcode::I64Store16,
    Opcode::I64Store32,
    Opcode::Jmp,
    Opcode::JmpIf,
    Opcode::JmpEither,
    Opcode::JmpTable,
    Opcode::ReturnValue,
    Opcode::ReturnVoid,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::Call,
    Opcode::CallIndirect,
    Opcode::InvokeImport,
    Opcode::CurrentMemory,
    Opcode::GrowMemory,
    Opcode::Phi,
    Opcode::AddGas,
    Opcode::FPDisabledError,
    Opcode::Unknown,
];

impl Opcode {
    /// Decode a serialized opcode byte. Bytes past the table are not opcodes.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        ALL_OPCODES.get(value as usize).copied()
    }

    /// Debug name, in the dotted style of the Wasm text format.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Unreachable => "unreachable",
            Opcode::Select => "select",
            Opcode::I32Const => "i32.const",
            Opcode::I32Add => "i32.add",
            Opcode::I32Sub => "i32.sub",
            Opcode::I32Mul => "i32.mul",
            Opcode::I32DivS => "i32.div_s",
            Opcode::I32DivU => "i32.div_u",
            Opcode::I32RemS => "i32.rem_s",
            Opcode::I32RemU => "i32.rem_u",
            Opcode::I32And => "i32.and",
            Opcode::I32Or => "i32.or",
            Opcode::I32Xor => "i32.xor",
            Opcode::I32Shl => "i32.shl",
            Opcode::I32ShrS => "i32.shr_s",
            Opcode::I32ShrU => "i32.shr_u",
            Opcode::I32Rotl => "i32.rotl",
            Opcode::I32Rotr => "i32.rotr",
            Opcode::I32Clz => "i32.clz",
            Opcode::I32Ctz => "i32.ctz",
            Opcode::I32PopCnt => "i32.popcnt",
            Opcode::I32EqZ => "i32.eqz",
            Opcode::I32Eq => "i32.eq",
            Opcode::I32Ne => "i32.ne",
            Opcode::I32LtS => "i32.lt_s",
            Opcode::I32LtU => "i32.lt_u",
            Opcode::I32LeS => "i32.le_s",
            Opcode::I32LeU => "i32.le_u",
            Opcode::I32GtS => "i32.gt_s",
            Opcode::I32GtU => "i32.gt_u",
            Opcode::I32GeS => "i32.ge_s",
            Opcode::I32GeU => "i32.ge_u",
            Opcode::I64Const => "i64.const",
            Opcode::I64Add => "i64.add",
            Opcode::I64Sub => "i64.sub",
            Opcode::I64Mul => "i64.mul",
            Opcode::I64DivS => "i64.div_s",
            Opcode::I64DivU => "i64.div_u",
            Opcode::I64RemS => "i64.rem_s",
            Opcode::I64RemU => "i64.rem_u",
            Opcode::I64Rotl => "i64.rotl",
            Opcode::I64Rotr => "i64.rotr",
            Opcode::I64Clz => "i64.clz",
            Opcode::I64Ctz => "i64.ctz",
            Opcode::I64PopCnt => "i64.popcnt",
            Opcode::I64EqZ => "i64.eqz",
            Opcode::I64And => "i64.and",
            Opcode::I64Or => "i64.or",
            Opcode::I64Xor => "i64.xor",
            Opcode::I64Shl => "i64.shl",
            Opcode::I64ShrS => "i64.shr_s",
            Opcode::I64ShrU => "i64.shr_u",
            Opcode::I64Eq => "i64.eq",
            Opcode::I64Ne => "i64.ne",
            Opcode::I64LtS => "i64.lt_s",
            Opcode::I64LtU => "i64.lt_u",
            Opcode::I64LeS => "i64.le_s",
            Opcode::I64LeU => "i64.le_u",
            Opcode::I64GtS => "i64.gt_s",
            Opcode::I64GtU => "i64.gt_u",
            Opcode::I64GeS => "i64.ge_s",
            Opcode::I64GeU => "i64.ge_u",
            Opcode::F32Add => "f32.add",
            Opcode::F32Sub => "f32.sub",
            Opcode::F32Mul => "f32.mul",
            Opcode::F32Div => "f32.div",
            Opcode::F32Sqrt => "f32.sqrt",
            Opcode::F32Min => "f32.min",
            Opcode::F32Max => "f32.max",
            Opcode::F32Ceil => "f32.ceil",
            Opcode::F32Floor => "f32.floor",
            Opcode::F32Trunc => "f32.trunc",
            Opcode::F32Nearest => "f32.nearest",
            Opcode::F32Abs => "f32.abs",
            Opcode::F32Neg => "f32.neg",
            Opcode::F32CopySign => "f32.copysign",
            Opcode::F32Eq => "f32.eq",
            Opcode::F32Ne => "f32.ne",
            Opcode::F32Lt => "f32.lt",
            Opcode::F32Le => "f32.le",
            Opcode::F32Gt => "f32.gt",
            Opcode::F32Ge => "f32.ge",
            Opcode::F64Add => "f64.add",
            Opcode::F64Sub => "f64.sub",
            Opcode::F64Mul => "f64.mul",
            Opcode::F64Div => "f64.div",
            Opcode::F64Sqrt => "f64.sqrt",
            Opcode::F64Min => "f64.min",
            Opcode::F64Max => "f64.max",
            Opcode::F64Ceil => "f64.ceil",
            Opcode::F64Floor => "f64.floor",
            Opcode::F64Trunc => "f64.trunc",
            Opcode::F64Nearest => "f64.nearest",
            Opcode::F64Abs => "f64.abs",
            Opcode::F64Neg => "f64.neg",
            Opcode::F64CopySign => "f64.copysign",
            Opcode::F64Eq => "f64.eq",
            Opcode::F64Ne => "f64.ne",
            Opcode::F64Lt => "f64.lt",
            Opcode::F64Le => "f64.le",
            Opcode::F64Gt => "f64.gt",
            Opcode::F64Ge => "f64.ge",
            Opcode::I32WrapI64 => "i32.wrap_i64",
            Opcode::I32TruncUF32 => "i32.trunc_f32_u",
            Opcode::I32TruncUF64 => "i32.trunc_f64_u",
            Opcode::I32TruncSF32 => "i32.trunc_f32_s",
            Opcode::I32TruncSF64 => "i32.trunc_f64_s",
            Opcode::I64TruncUF32 => "i64.trunc_f32_u",
            Opcode::I64TruncUF64 => "i64.trunc_f64_u",
            Opcode::I64TruncSF32 => "i64.trunc_f32_s",
            Opcode::I64TruncSF64 => "i64.trunc_f64_s",
            Opcode::I64ExtendUI32 => "i64.extend_i32_u",
            Opcode::I64ExtendSI32 => "i64.extend_i32_s",
            Opcode::F32DemoteF64 => "f32.demote_f64",
            Opcode::F64PromoteF32 => "f64.promote_f32",
            Opcode::F32ConvertSI32 => "f32.convert_i32_s",
            Opcode::F32ConvertSI64 => "f32.convert_i64_s",
            Opcode::F32ConvertUI32 => "f32.convert_i32_u",
            Opcode::F32ConvertUI64 => "f32.convert_i64_u",
            Opcode::F64ConvertSI32 => "f64.convert_i32_s",
            Opcode::F64ConvertSI64 => "f64.convert_i64_s",
            Opcode::F64ConvertUI32 => "f64.convert_i32_u",
            Opcode::F64ConvertUI64 => "f64.convert_i64_u",
            Opcode::I32Load => "i32.load",
            Opcode::I64Load => "i64.load",
            Opcode::I32Store => "i32.store",
            Opcode::I64Store => "i64.store",
            Opcode::I32Load8S => "i32.load8_s",
            Opcode::I32Load16S => "i32.load16_s",
            Opcode::I64Load8S => "i64.load8_s",
            Opcode::I64Load16S => "i64.load16_s",
            Opcode::I64Load32S => "i64.load32_s",
            Opcode::I32Load8U => "i32.load8_u",
            Opcode::I32Load16U => "i32.load16_u",
            Opcode::I64Load8U => "i64.load8_u",
            Opcode::I64Load16U => "i64.load16_u",
            Opcode::I64Load32U => "i64.load32_u",
            Opcode::I32Store8 => "i32.store8",
            Opcode::I32Store16 => "i32.store16",
            Opcode::I64Store8 => "i64.store8",
            Opcode::I64Store16 => "i64.store16",
            Opcode::I64Store32 => "i64.store32",
            Opcode::Jmp => "jmp",
            Opcode::JmpIf => "jmp_if",
            Opcode::JmpEither => "jmp_either",
            Opcode::JmpTable => "jmp_table",
            Opcode::ReturnValue => "return_value",
            Opcode::ReturnVoid => "return_void",
            Opcode::GetLocal => "get_local",
            Opcode::SetLocal => "set_local",
            Opcode::GetGlobal => "get_global",
            Opcode::SetGlobal => "set_global",
            Opcode::Call => "call",
            Opcode::CallIndirect => "call_indirect",
            Opcode::InvokeImport => "invoke_import",
            Opcode::CurrentMemory => "current_memory",
            Opcode::GrowMemory => "grow_memory",
            Opcode::Phi => "phi",
            Opcode::AddGas => "add_gas",
            Opcode::FPDisabledError => "fp_disabled_error",
            Opcode::Unknown => "unknown",
        }
    }

    /// True for opcodes rewritten to [`Opcode::FPDisabledError`] when a
    /// module is compiled with floating point disabled.
    pub fn is_floating_point(self) -> bool {
        let byte = self as u8;
        let float_arith = byte >= Opcode::F32Add as u8 && byte <= Opcode::F64Ge as u8;
        let float_conv = byte >= Opcode::I32TruncUF32 as u8
            && byte <= Opcode::F64ConvertUI64 as u8
            && self != Opcode::I64ExtendUI32
            && self != Opcode::I64ExtendSI32;
        float_arith || float_conv
    }

    /// True for terminators: jumps and returns.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::JmpIf
                | Opcode::JmpEither
                | Opcode::JmpTable
                | Opcode::ReturnValue
                | Opcode::ReturnVoid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_count() {
        assert_eq!(ALL_OPCODES.len(), 162);
    }

    #[test]
    fn byte_values_match_table_positions() {
        for (i, &op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(op as u8 as usize, i, "misplaced opcode {op:?}");
        }
    }

    #[test]
    fn roundtrip_all_opcodes() {
        for &op in &ALL_OPCODES {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
    }

    #[test]
    fn bytes_past_table_are_not_opcodes() {
        for byte in ALL_OPCODES.len() as u8..=u8::MAX {
            assert_eq!(Opcode::from_u8(byte), None);
        }
    }

    #[test]
    fn every_opcode_has_a_name() {
        for &op in &ALL_OPCODES {
            assert!(!op.name().is_empty(), "empty name for {op:?}");
        }
    }

    #[test]
    fn names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for &op in &ALL_OPCODES {
            assert!(seen.insert(op.name()), "duplicate name {}", op.name());
        }
    }

    #[test]
    fn float_classification() {
        assert!(Opcode::F32Add.is_floating_point());
        assert!(Opcode::F64Ge.is_floating_point());
        assert!(Opcode::I32TruncSF64.is_floating_point());
        assert!(Opcode::F64ConvertUI64.is_floating_point());
        assert!(Opcode::F32DemoteF64.is_floating_point());
        assert!(!Opcode::I32WrapI64.is_floating_point());
        assert!(!Opcode::I64ExtendSI32.is_floating_point());
        assert!(!Opcode::I64ExtendUI32.is_floating_point());
        assert!(!Opcode::I32Add.is_floating_point());
        assert!(!Opcode::I64Load.is_floating_point());
    }

    #[test]
    fn terminator_classification() {
        assert!(Opcode::Jmp.is_terminator());
        assert!(Opcode::JmpTable.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(!Opcode::Phi.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }
}
