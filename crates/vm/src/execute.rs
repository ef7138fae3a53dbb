//! The fetch/decode/dispatch loop.
//!
//! Instructions start with a `u32` target register and a one-byte opcode;
//! operand layout past that is opcode-specific and mirrors the compiler's
//! serializer. Registers are untyped i64 slots: 32-bit operations project
//! their operands by truncation and store results sign-extended; floats
//! travel as raw bit patterns.
//!
//! The loop leaves in exactly four ways: a return with an empty call stack
//! (exit), an `invoke_import` (delegate recorded, driver resumes later),
//! `add_gas` hitting the limit in suspend mode, and a trap (converted to an
//! exit error by the `execute` guard).

use crate::machine::{PendingImport, VirtualMachine, UNINITIALIZED_TABLE_ENTRY, WASM_PAGE_SIZE};
use crate::trap::{ExitError, Trap};
use cinder_compiler::opcode::Opcode;
use std::sync::Arc;

struct Decoder<'a> {
    code: &'a [u8],
    ip: usize,
}

impl<'a> Decoder<'a> {
    fn u8(&mut self) -> u8 {
        let value = self.code[self.ip];
        self.ip += 1;
        value
    }

    fn u32(&mut self) -> u32 {
        let value = u32::from_le_bytes(
            self.code[self.ip..self.ip + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        self.ip += 4;
        value
    }

    fn i32(&mut self) -> i32 {
        self.u32() as i32
    }

    fn u64(&mut self) -> u64 {
        let value = u64::from_le_bytes(
            self.code[self.ip..self.ip + 8]
                .try_into()
                .expect("8-byte slice"),
        );
        self.ip += 8;
        value
    }

    fn i64(&mut self) -> i64 {
        self.u64() as i64
    }

    fn u32_at(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.code[at..at + 4].try_into().expect("4-byte slice"))
    }
}

/// Wasm float min/max: NaN propagates, and -0 orders below +0.
fn fmin(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn fmax(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else {
        a.max(b)
    }
}

impl VirtualMachine {
    /// One activation of the dispatch loop.
    ///
    /// Panics on driver misuse: an exited machine, a pending delegate, or
    /// re-entrant execution. Traps are caught here and recorded as the
    /// machine's exit error.
    pub fn execute(&mut self) {
        assert!(!self.exited, "attempting to execute an exited machine");
        assert!(
            self.delegate.is_none(),
            "pending import must be invoked and cleared before execute"
        );
        assert!(!self.inside_execute, "execution is not re-entrant");

        self.inside_execute = true;
        self.gas_limit_exceeded = false;
        let result = self.dispatch();
        self.inside_execute = false;

        if let Err(trap) = result {
            tracing::debug!(%trap, "execution trapped");
            self.exited = true;
            self.exit_error = Some(ExitError::Trap(trap));
        }
    }

    #[inline]
    fn reg(&self, fi: usize, index: u32) -> i64 {
        self.call_stack[fi].values[index as usize]
    }

    #[inline]
    fn set_reg(&mut self, fi: usize, target: usize, value: i64) {
        self.call_stack[fi].values[target] = value;
    }

    #[inline]
    fn local(&self, fi: usize, index: u32) -> i64 {
        let frame = &self.call_stack[fi];
        frame.values[frame.num_regs + index as usize]
    }

    #[inline]
    fn set_local(&mut self, fi: usize, index: u32, value: i64) {
        let frame = &mut self.call_stack[fi];
        frame.values[frame.num_regs + index as usize] = value;
    }

    fn mem_bytes<const N: usize>(&self, addr: u64) -> Result<[u8; N], Trap> {
        let end = addr.checked_add(N as u64).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.memory.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let start = addr as usize;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.memory[start..start + N]);
        Ok(buf)
    }

    fn mem_write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let end = addr
            .checked_add(bytes.len() as u64)
            .ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.memory.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let start = addr as usize;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn global(&self, index: u32) -> Result<i64, Trap> {
        self.globals
            .get(index as usize)
            .copied()
            .ok_or(Trap::GlobalIndexOutOfBounds)
    }

    fn dispatch(&mut self) -> Result<(), Trap> {
        let codes = Arc::clone(&self.function_code);

        'frames: loop {
            let fi = self.current_frame as usize;
            let function_id = self.call_stack[fi].function_id;
            let code: &[u8] = &codes[function_id].bytes;
            let mut d = Decoder {
                code,
                ip: self.call_stack[fi].ip,
            };

            loop {
                let target = d.u32() as usize;
                let op_byte = d.u8();
                let Some(op) = Opcode::from_u8(op_byte) else {
                    return Err(Trap::UnknownInstruction(op_byte));
                };

                match op {
                    Opcode::Nop => {}
                    Opcode::Unreachable => return Err(Trap::Unreachable),
                    Opcode::Unknown => return Err(Trap::UnknownInstruction(op_byte)),
                    Opcode::FPDisabledError => return Err(Trap::FloatingPointDisabled),

                    Opcode::Select => {
                        let a = self.reg(fi, d.u32());
                        let b = self.reg(fi, d.u32());
                        let cond = self.reg(fi, d.u32());
                        self.set_reg(fi, target, if cond != 0 { a } else { b });
                    }

                    // ---- constants ----
                    Opcode::I32Const => {
                        let value = d.i32();
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Const => {
                        let value = d.i64();
                        self.set_reg(fi, target, value);
                    }

                    // ---- i32 arithmetic ----
                    Opcode::I32Add => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_add(b) as i64);
                    }
                    Opcode::I32Sub => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_sub(b) as i64);
                    }
                    Opcode::I32Mul => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_mul(b) as i64);
                    }
                    Opcode::I32DivS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        if a == i32::MIN && b == -1 {
                            return Err(Trap::IntegerOverflow);
                        }
                        self.set_reg(fi, target, (a / b) as i64);
                    }
                    Opcode::I32DivU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, (a / b) as i32 as i64);
                    }
                    Opcode::I32RemS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, a.wrapping_rem(b) as i64);
                    }
                    Opcode::I32RemU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, (a % b) as i32 as i64);
                    }
                    Opcode::I32And => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a & b) as i64);
                    }
                    Opcode::I32Or => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a | b) as i64);
                    }
                    Opcode::I32Xor => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a ^ b) as i64);
                    }
                    Opcode::I32Shl => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shl(b as u32) as i64);
                    }
                    Opcode::I32ShrS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shr(b as u32) as i64);
                    }
                    Opcode::I32ShrU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shr(b) as i32 as i64);
                    }
                    Opcode::I32Rotl => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.rotate_left(b % 32) as i32 as i64);
                    }
                    Opcode::I32Rotr => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, a.rotate_right(b % 32) as i32 as i64);
                    }
                    Opcode::I32Clz => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_reg(fi, target, a.leading_zeros() as i64);
                    }
                    Opcode::I32Ctz => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_reg(fi, target, a.trailing_zeros() as i64);
                    }
                    Opcode::I32PopCnt => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_reg(fi, target, a.count_ones() as i64);
                    }
                    Opcode::I32EqZ => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_reg(fi, target, (a == 0) as i64);
                    }
                    Opcode::I32Eq => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a == b) as i64);
                    }
                    Opcode::I32Ne => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a != b) as i64);
                    }
                    Opcode::I32LtS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::I32LtU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::I32LeS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::I32LeU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::I32GtS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::I32GtU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::I32GeS => {
                        let (a, b) = self.i32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }
                    Opcode::I32GeU => {
                        let (a, b) = self.u32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }

                    // ---- i64 arithmetic ----
                    Opcode::I64Add => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_add(b));
                    }
                    Opcode::I64Sub => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_sub(b));
                    }
                    Opcode::I64Mul => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_mul(b));
                    }
                    Opcode::I64DivS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        if a == i64::MIN && b == -1 {
                            return Err(Trap::IntegerOverflow);
                        }
                        self.set_reg(fi, target, a / b);
                    }
                    Opcode::I64DivU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, (a / b) as i64);
                    }
                    Opcode::I64RemS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, a.wrapping_rem(b));
                    }
                    Opcode::I64RemU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        if b == 0 {
                            return Err(Trap::DivisionByZero);
                        }
                        self.set_reg(fi, target, (a % b) as i64);
                    }
                    Opcode::I64And => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a & b);
                    }
                    Opcode::I64Or => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a | b);
                    }
                    Opcode::I64Xor => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a ^ b);
                    }
                    Opcode::I64Shl => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shl(b as u32));
                    }
                    Opcode::I64ShrS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shr(b as u32));
                    }
                    Opcode::I64ShrU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.wrapping_shr(b as u32) as i64);
                    }
                    Opcode::I64Rotl => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.rotate_left((b % 64) as u32) as i64);
                    }
                    Opcode::I64Rotr => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, a.rotate_right((b % 64) as u32) as i64);
                    }
                    Opcode::I64Clz => {
                        let a = self.reg(fi, d.u32()) as u64;
                        self.set_reg(fi, target, a.leading_zeros() as i64);
                    }
                    Opcode::I64Ctz => {
                        let a = self.reg(fi, d.u32()) as u64;
                        self.set_reg(fi, target, a.trailing_zeros() as i64);
                    }
                    Opcode::I64PopCnt => {
                        let a = self.reg(fi, d.u32()) as u64;
                        self.set_reg(fi, target, a.count_ones() as i64);
                    }
                    Opcode::I64EqZ => {
                        let a = self.reg(fi, d.u32());
                        self.set_reg(fi, target, (a == 0) as i64);
                    }
                    Opcode::I64Eq => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a == b) as i64);
                    }
                    Opcode::I64Ne => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a != b) as i64);
                    }
                    Opcode::I64LtS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::I64LtU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::I64LeS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::I64LeU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::I64GtS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::I64GtU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::I64GeS => {
                        let (a, b) = self.i64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }
                    Opcode::I64GeU => {
                        let (a, b) = self.u64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }

                    // ---- f32 ----
                    Opcode::F32Add => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, a + b);
                    }
                    Opcode::F32Sub => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, a - b);
                    }
                    Opcode::F32Mul => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, a * b);
                    }
                    Opcode::F32Div => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, a / b);
                    }
                    Opcode::F32Min => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, fmin(a as f64, b as f64) as f32);
                    }
                    Opcode::F32Max => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, fmax(a as f64, b as f64) as f32);
                    }
                    Opcode::F32CopySign => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_f32(fi, target, a.copysign(b));
                    }
                    Opcode::F32Sqrt => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.sqrt());
                    }
                    Opcode::F32Ceil => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.ceil());
                    }
                    Opcode::F32Floor => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.floor());
                    }
                    Opcode::F32Trunc => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.trunc());
                    }
                    Opcode::F32Nearest => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.round_ties_even());
                    }
                    Opcode::F32Abs => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, a.abs());
                    }
                    Opcode::F32Neg => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f32(fi, target, -a);
                    }
                    Opcode::F32Eq => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a == b) as i64);
                    }
                    Opcode::F32Ne => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a != b) as i64);
                    }
                    Opcode::F32Lt => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::F32Le => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::F32Gt => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::F32Ge => {
                        let (a, b) = self.f32_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }

                    // ---- f64 ----
                    Opcode::F64Add => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, a + b);
                    }
                    Opcode::F64Sub => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, a - b);
                    }
                    Opcode::F64Mul => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, a * b);
                    }
                    Opcode::F64Div => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, a / b);
                    }
                    Opcode::F64Min => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, fmin(a, b));
                    }
                    Opcode::F64Max => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, fmax(a, b));
                    }
                    Opcode::F64CopySign => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_f64(fi, target, a.copysign(b));
                    }
                    Opcode::F64Sqrt => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.sqrt());
                    }
                    Opcode::F64Ceil => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.ceil());
                    }
                    Opcode::F64Floor => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.floor());
                    }
                    Opcode::F64Trunc => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.trunc());
                    }
                    Opcode::F64Nearest => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.round_ties_even());
                    }
                    Opcode::F64Abs => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, a.abs());
                    }
                    Opcode::F64Neg => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f64(fi, target, -a);
                    }
                    Opcode::F64Eq => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a == b) as i64);
                    }
                    Opcode::F64Ne => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a != b) as i64);
                    }
                    Opcode::F64Lt => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a < b) as i64);
                    }
                    Opcode::F64Le => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a <= b) as i64);
                    }
                    Opcode::F64Gt => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a > b) as i64);
                    }
                    Opcode::F64Ge => {
                        let (a, b) = self.f64_operands(fi, &mut d);
                        self.set_reg(fi, target, (a >= b) as i64);
                    }

                    // ---- conversions ----
                    Opcode::I32WrapI64 => {
                        let a = self.reg(fi, d.u32());
                        self.set_reg(fi, target, a as i32 as i64);
                    }
                    // The operand type picked at lowering carries the
                    // signedness; both variants truncate identically here.
                    Opcode::I32TruncSF32 | Opcode::I32TruncUF32 => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_reg(fi, target, (a.trunc() as i64) as i32 as i64);
                    }
                    Opcode::I32TruncSF64 | Opcode::I32TruncUF64 => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_reg(fi, target, (a.trunc() as i64) as i32 as i64);
                    }
                    Opcode::I64TruncSF32 | Opcode::I64TruncUF32 => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_reg(fi, target, a.trunc() as i64);
                    }
                    Opcode::I64TruncSF64 | Opcode::I64TruncUF64 => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_reg(fi, target, a.trunc() as i64);
                    }
                    Opcode::I64ExtendUI32 => {
                        let a = self.reg(fi, d.u32());
                        self.set_reg(fi, target, (a as u32) as i64);
                    }
                    Opcode::I64ExtendSI32 => {
                        let a = self.reg(fi, d.u32());
                        self.set_reg(fi, target, a as i32 as i64);
                    }
                    Opcode::F32DemoteF64 => {
                        let a = self.f64_operand(fi, &mut d);
                        self.set_f32(fi, target, a as f32);
                    }
                    Opcode::F64PromoteF32 => {
                        let a = self.f32_operand(fi, &mut d);
                        self.set_f64(fi, target, a as f64);
                    }
                    Opcode::F32ConvertSI32 => {
                        let a = self.reg(fi, d.u32()) as i32;
                        self.set_f32(fi, target, a as f32);
                    }
                    Opcode::F32ConvertUI32 => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_f32(fi, target, a as f32);
                    }
                    Opcode::F32ConvertSI64 => {
                        let a = self.reg(fi, d.u32());
                        self.set_f32(fi, target, a as f32);
                    }
                    Opcode::F32ConvertUI64 => {
                        let a = self.reg(fi, d.u32()) as u64;
                        self.set_f32(fi, target, a as f32);
                    }
                    Opcode::F64ConvertSI32 => {
                        let a = self.reg(fi, d.u32()) as i32;
                        self.set_f64(fi, target, a as f64);
                    }
                    Opcode::F64ConvertUI32 => {
                        let a = self.reg(fi, d.u32()) as u32;
                        self.set_f64(fi, target, a as f64);
                    }
                    Opcode::F64ConvertSI64 => {
                        let a = self.reg(fi, d.u32());
                        self.set_f64(fi, target, a as f64);
                    }
                    Opcode::F64ConvertUI64 => {
                        let a = self.reg(fi, d.u32()) as u64;
                        self.set_f64(fi, target, a as f64);
                    }

                    // ---- memory ----
                    Opcode::I32Load => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = i32::from_le_bytes(self.mem_bytes::<4>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Load => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = i64::from_le_bytes(self.mem_bytes::<8>(addr)?);
                        self.set_reg(fi, target, value);
                    }
                    Opcode::I32Load8S => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.mem_bytes::<1>(addr)?[0] as i8;
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I32Load8U | Opcode::I64Load8U => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.mem_bytes::<1>(addr)?[0];
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I32Load16S => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = i16::from_le_bytes(self.mem_bytes::<2>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I32Load16U | Opcode::I64Load16U => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = u16::from_le_bytes(self.mem_bytes::<2>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Load8S => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.mem_bytes::<1>(addr)?[0] as i8;
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Load16S => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = i16::from_le_bytes(self.mem_bytes::<2>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Load32S => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = i32::from_le_bytes(self.mem_bytes::<4>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I64Load32U => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = u32::from_le_bytes(self.mem_bytes::<4>(addr)?);
                        self.set_reg(fi, target, value as i64);
                    }
                    Opcode::I32Store => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.reg(fi, d.u32()) as u32;
                        self.mem_write(addr, &value.to_le_bytes())?;
                    }
                    Opcode::I64Store => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.reg(fi, d.u32());
                        self.mem_write(addr, &value.to_le_bytes())?;
                    }
                    Opcode::I32Store8 | Opcode::I64Store8 => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.reg(fi, d.u32()) as u8;
                        self.mem_write(addr, &[value])?;
                    }
                    Opcode::I32Store16 | Opcode::I64Store16 => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.reg(fi, d.u32()) as u16;
                        self.mem_write(addr, &value.to_le_bytes())?;
                    }
                    Opcode::I64Store32 => {
                        let addr = self.effective_addr(fi, &mut d);
                        let value = self.reg(fi, d.u32()) as u32;
                        self.mem_write(addr, &value.to_le_bytes())?;
                    }

                    Opcode::CurrentMemory => {
                        let pages = self.memory.len() / WASM_PAGE_SIZE;
                        self.set_reg(fi, target, pages as i64);
                    }
                    Opcode::GrowMemory => {
                        let n = self.reg(fi, d.u32()) as u32 as usize;
                        let current = self.memory.len() / WASM_PAGE_SIZE;
                        match current.checked_add(n) {
                            Some(total)
                                if self.environment.max_memory_pages == 0
                                    || total <= self.environment.max_memory_pages =>
                            {
                                self.memory.resize(total * WASM_PAGE_SIZE, 0);
                                self.set_reg(fi, target, current as i64);
                            }
                            _ => self.set_reg(fi, target, -1),
                        }
                    }

                    // ---- locals and globals ----
                    Opcode::GetLocal => {
                        let index = d.u32();
                        let value = self.local(fi, index);
                        self.set_reg(fi, target, value);
                    }
                    Opcode::SetLocal => {
                        let index = d.u32();
                        let value = self.reg(fi, d.u32());
                        self.set_local(fi, index, value);
                    }
                    Opcode::GetGlobal => {
                        let index = d.u32();
                        let value = self.global(index)?;
                        self.set_reg(fi, target, value);
                    }
                    Opcode::SetGlobal => {
                        let index = d.u32();
                        let value = self.reg(fi, d.u32());
                        if index as usize >= self.globals.len() {
                            return Err(Trap::GlobalIndexOutOfBounds);
                        }
                        self.globals[index as usize] = value;
                    }

                    // ---- control ----
                    Opcode::Jmp => {
                        let to = d.u32() as usize;
                        let yielded = self.reg(fi, d.u32());
                        self.yielded = yielded;
                        d.ip = to;
                    }
                    Opcode::JmpIf => {
                        let to = d.u32() as usize;
                        let cond = self.reg(fi, d.u32());
                        let yielded = self.reg(fi, d.u32());
                        if cond != 0 {
                            self.yielded = yielded;
                            d.ip = to;
                        }
                    }
                    Opcode::JmpEither => {
                        let to_a = d.u32() as usize;
                        let to_b = d.u32() as usize;
                        let cond = self.reg(fi, d.u32());
                        let yielded = self.reg(fi, d.u32());
                        self.yielded = yielded;
                        d.ip = if cond != 0 { to_a } else { to_b };
                    }
                    Opcode::JmpTable => {
                        let count = d.u32() as usize;
                        let table_at = d.ip;
                        d.ip += count * 4;
                        let default = d.u32() as usize;
                        let cond = self.reg(fi, d.u32());
                        let yielded = self.reg(fi, d.u32());
                        self.yielded = yielded;
                        d.ip = if cond >= 0 && (cond as usize) < count {
                            d.u32_at(table_at + cond as usize * 4) as usize
                        } else {
                            default
                        };
                    }
                    Opcode::Phi => {
                        self.set_reg(fi, target, self.yielded);
                    }

                    Opcode::ReturnValue => {
                        let value = self.reg(fi, d.u32());
                        let return_reg = self.call_stack[fi].return_reg;
                        self.destroy_frame(fi);
                        self.current_frame -= 1;
                        if self.current_frame == -1 {
                            self.exited = true;
                            self.return_value = value;
                            return Ok(());
                        }
                        let caller = self.current_frame as usize;
                        self.call_stack[caller].values[return_reg] = value;
                        continue 'frames;
                    }
                    Opcode::ReturnVoid => {
                        self.destroy_frame(fi);
                        self.current_frame -= 1;
                        if self.current_frame == -1 {
                            self.exited = true;
                            self.return_value = 0;
                            return Ok(());
                        }
                        continue 'frames;
                    }

                    Opcode::Call => {
                        let callee = d.u32() as usize;
                        let argc = d.u32() as usize;
                        let mut args = Vec::with_capacity(argc);
                        for _ in 0..argc {
                            args.push(self.reg(fi, d.u32()));
                        }
                        self.call_stack[fi].ip = d.ip;
                        self.push_frame(callee, target, &args, &codes)?;
                        continue 'frames;
                    }
                    Opcode::CallIndirect => {
                        let type_id = d.u32() as usize;
                        let count = d.u32() as usize;
                        let argc = count - 1;
                        let mut args = Vec::with_capacity(argc);
                        for _ in 0..argc {
                            args.push(self.reg(fi, d.u32()));
                        }
                        let table_index = self.reg(fi, d.u32()) as u32 as usize;

                        let entry = *self
                            .table
                            .get(table_index)
                            .ok_or(Trap::UndefinedTableEntry)?;
                        if entry == UNINITIALIZED_TABLE_ENTRY {
                            return Err(Trap::UninitializedTableEntry);
                        }
                        let callee = entry as usize;
                        let meta = codes.get(callee).ok_or(Trap::UndefinedTableEntry)?;
                        let (num_params, num_returns) = {
                            let sig = self
                                .module
                                .base
                                .types
                                .get(type_id)
                                .ok_or(Trap::TypeMismatch)?;
                            (sig.params.len(), sig.results.len())
                        };
                        if meta.num_params != num_params || meta.num_returns != num_returns {
                            return Err(Trap::TypeMismatch);
                        }

                        self.call_stack[fi].ip = d.ip;
                        self.push_frame(callee, target, &args, &codes)?;
                        continue 'frames;
                    }

                    Opcode::InvokeImport => {
                        let import_id = d.u32() as usize;
                        self.call_stack[fi].ip = d.ip;
                        self.call_stack[fi].continuation = target as i32;
                        self.delegate = Some(PendingImport {
                            import_id,
                            return_reg: target,
                        });
                        return Ok(());
                    }

                    Opcode::AddGas => {
                        let delta = d.u64();
                        if !self.add_and_check_gas(delta)? {
                            // Suspend past this counter; the block resumes
                            // uncharged when the driver re-enters.
                            self.gas_limit_exceeded = true;
                            self.call_stack[fi].ip = d.ip;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    #[inline]
    fn effective_addr(&mut self, fi: usize, d: &mut Decoder<'_>) -> u64 {
        let _align = d.u32();
        let offset = d.u32() as u64;
        let base = self.reg(fi, d.u32());
        (base as u64).wrapping_add(offset)
    }

    fn push_frame(
        &mut self,
        function_id: usize,
        return_reg: usize,
        args: &[i64],
        codes: &[cinder_compiler::module::InterpreterCode],
    ) -> Result<(), Trap> {
        let depth = (self.current_frame + 1) as usize;
        if depth >= self.call_stack.len() {
            return Err(Trap::CallStackOverflow);
        }
        if self.environment.max_call_stack_depth != 0
            && depth >= self.environment.max_call_stack_depth
        {
            return Err(Trap::CallStackOverflow);
        }
        let code = &codes[function_id];
        self.charge_value_slots(code)?;
        self.current_frame = depth as isize;
        let frame = &mut self.call_stack[depth];
        frame.init(function_id, code);
        frame.return_reg = return_reg;
        frame.locals_mut()[..args.len()].copy_from_slice(args);
        Ok(())
    }

    #[inline]
    fn i32_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (i32, i32) {
        let a = self.reg(fi, d.u32()) as i32;
        let b = self.reg(fi, d.u32()) as i32;
        (a, b)
    }

    #[inline]
    fn u32_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (u32, u32) {
        let a = self.reg(fi, d.u32()) as u32;
        let b = self.reg(fi, d.u32()) as u32;
        (a, b)
    }

    #[inline]
    fn i64_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (i64, i64) {
        let a = self.reg(fi, d.u32());
        let b = self.reg(fi, d.u32());
        (a, b)
    }

    #[inline]
    fn u64_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (u64, u64) {
        let a = self.reg(fi, d.u32()) as u64;
        let b = self.reg(fi, d.u32()) as u64;
        (a, b)
    }

    #[inline]
    fn f32_operand(&self, fi: usize, d: &mut Decoder<'_>) -> f32 {
        f32::from_bits(self.reg(fi, d.u32()) as u32)
    }

    #[inline]
    fn f32_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (f32, f32) {
        let a = self.f32_operand(fi, d);
        let b = self.f32_operand(fi, d);
        (a, b)
    }

    #[inline]
    fn f64_operand(&self, fi: usize, d: &mut Decoder<'_>) -> f64 {
        f64::from_bits(self.reg(fi, d.u32()) as u64)
    }

    #[inline]
    fn f64_operands(&self, fi: usize, d: &mut Decoder<'_>) -> (f64, f64) {
        let a = self.f64_operand(fi, d);
        let b = self.f64_operand(fi, d);
        (a, b)
    }

    #[inline]
    fn set_f32(&mut self, fi: usize, target: usize, value: f32) {
        self.set_reg(fi, target, value.to_bits() as i32 as i64);
    }

    #[inline]
    fn set_f64(&mut self, fi: usize, target: usize, value: f64) {
        self.set_reg(fi, target, value.to_bits() as i64);
    }
}
