//! Evaluation of Wasm initializer expressions.
//!
//! A tiny stack machine over the constant operator subset: integer and
//! float constants (floats as raw bit patterns) plus reads of
//! already-initialized globals. Used for global initial values and for
//! element/data segment offsets.

use crate::machine::VmError;
use cinder_compiler::wasm::InitOp;

/// Evaluate an initializer expression against the globals resolved so far.
/// The result is the value left on top of the expression stack.
pub fn eval_init_expr(ops: &[InitOp], globals: &[i64]) -> Result<i64, VmError> {
    let mut stack: Vec<i64> = Vec::new();
    for op in ops {
        match *op {
            InitOp::I32Const(value) => stack.push(value as i64),
            InitOp::I64Const(value) => stack.push(value),
            InitOp::F32Const(bits) => stack.push(bits as i64),
            InitOp::F64Const(bits) => stack.push(bits as i64),
            InitOp::GetGlobal(index) => {
                let value = globals
                    .get(index as usize)
                    .copied()
                    .ok_or(VmError::InvalidInitExpression)?;
                stack.push(value);
            }
        }
    }
    stack.last().copied().ok_or(VmError::InvalidInitExpression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_const() {
        assert_eq!(eval_init_expr(&[InitOp::I32Const(-7)], &[]).unwrap(), -7);
    }

    #[test]
    fn i64_const() {
        assert_eq!(
            eval_init_expr(&[InitOp::I64Const(1 << 40)], &[]).unwrap(),
            1 << 40
        );
    }

    #[test]
    fn float_constants_are_bit_patterns() {
        let bits = 1.5f64.to_bits();
        assert_eq!(
            eval_init_expr(&[InitOp::F64Const(bits)], &[]).unwrap(),
            bits as i64
        );
    }

    #[test]
    fn reads_resolved_globals() {
        assert_eq!(
            eval_init_expr(&[InitOp::GetGlobal(1)], &[10, 20]).unwrap(),
            20
        );
    }

    #[test]
    fn unknown_global_fails() {
        assert!(eval_init_expr(&[InitOp::GetGlobal(3)], &[1]).is_err());
    }

    #[test]
    fn empty_expression_fails() {
        assert!(eval_init_expr(&[], &[]).is_err());
    }
}
