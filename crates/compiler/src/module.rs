//! Module loading: decode, per-function lowering, debug names, identity.

use crate::error::{CompileError, DecodeError};
use crate::gas::GasPolicy;
use crate::instr::build_instr;
use crate::opcode::Opcode;
use crate::serialize::serialize_code;
use crate::ssa::SsaFunctionCompiler;
use crate::wasm::{FuncSig, RawModule};
use cinder_common::Digest;
use std::collections::BTreeMap;
use wasmparser::{Name, NameSectionReader};

/// Compiled artifact of one function, ready for the interpreter.
///
/// Lives as long as the module; frames borrow the bytes per activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterCode {
    pub num_regs: usize,
    pub num_params: usize,
    pub num_locals: usize,
    pub num_returns: usize,
    pub bytes: Vec<u8>,
}

/// A loaded module: decoded sections, debug names, and content identity.
#[derive(Debug, Clone)]
pub struct Module {
    pub base: RawModule,
    pub function_names: BTreeMap<u32, String>,
    pub disable_floating_point: bool,
    /// Digest of the raw module bytes; immutable after construction.
    pub identifier: Digest,
}

impl Module {
    /// Decode `bytes` and extract function-name metadata.
    pub fn load(bytes: impl Into<Vec<u8>>) -> Result<Module, CompileError> {
        let bytes = bytes.into();
        let identifier = cinder_common::hash(&bytes);
        let base = RawModule::decode(bytes)?;
        let function_names = parse_function_names(&base)?;
        tracing::debug!(
            functions = base.func_type_ids.len(),
            imports = base.imports.len(),
            "module loaded"
        );
        Ok(Module {
            base,
            function_names,
            disable_floating_point: false,
            identifier,
        })
    }

    /// Number of function imports; they occupy the head of the function
    /// index space and the same slots in the compiled-code table.
    pub fn num_function_imports(&self) -> usize {
        self.base.num_function_imports()
    }

    /// Lower every function to interpreter bytes: import shims first, then
    /// the module-defined functions through the full pipeline.
    pub fn compile_for_interpreter(
        &self,
        gas_policy: Option<&dyn GasPolicy>,
    ) -> Result<Vec<InterpreterCode>, CompileError> {
        let import_type_ids = self.base.import_type_ids();
        let mut out = Vec::with_capacity(import_type_ids.len() + self.base.func_type_ids.len());

        for (slot, &type_id) in import_type_ids.iter().enumerate() {
            let sig = self
                .base
                .types
                .get(type_id as usize)
                .ok_or_else(|| DecodeError::Parse(format!("unknown import type {type_id}")))?;
            out.push(synthesize_import_shim(slot, sig));
        }

        for func_index in 0..self.base.func_type_ids.len() {
            let type_id = self.base.func_type_ids[func_index] as usize;
            let sig = self
                .base
                .types
                .get(type_id)
                .ok_or_else(|| DecodeError::Parse(format!("unknown function type {type_id}")))?;

            let mut compiler = SsaFunctionCompiler::new(&self.base, import_type_ids.len());
            compiler.compile(func_index, &import_type_ids)?;
            if self.disable_floating_point {
                compiler.filter_floating_point();
            }
            match gas_policy {
                Some(policy) => compiler.insert_gas_counters(policy)?,
                None => compiler.canonicalize()?,
            }
            let num_regs = compiler.reg_alloc()?;
            let bytes = compiler.serialize();

            out.push(InterpreterCode {
                num_regs,
                num_params: sig.params.len(),
                num_locals: compiler.num_locals,
                num_returns: sig.results.len(),
                bytes,
            });
        }

        Ok(out)
    }
}

/// A function import is called like any other function; its body hands the
/// frame over to the host and returns whatever came back.
fn synthesize_import_shim(import_id: usize, sig: &FuncSig) -> InterpreterCode {
    let mut code = vec![build_instr(
        1,
        Opcode::InvokeImport,
        vec![import_id as i64],
        vec![],
    )];
    if sig.results.is_empty() {
        code.push(build_instr(0, Opcode::ReturnVoid, vec![], vec![]));
    } else {
        code.push(build_instr(0, Opcode::ReturnValue, vec![], vec![1]));
    }
    InterpreterCode {
        num_regs: 2,
        num_params: sig.params.len(),
        num_locals: 0,
        num_returns: sig.results.len(),
        bytes: serialize_code(&code),
    }
}

/// Scan the `name` custom section for function names (sub-section 1).
/// A malformed table aborts loading.
fn parse_function_names(base: &RawModule) -> Result<BTreeMap<u32, String>, CompileError> {
    let mut names = BTreeMap::new();
    let Some(range) = base.name_section.clone() else {
        return Ok(names);
    };

    let reader = NameSectionReader::new(&base.bytes[range.clone()], range.start);
    for part in reader {
        let part =
            part.map_err(|e| DecodeError::MalformedNameSection(e.to_string()))?;
        if let Name::Function(map) = part {
            for naming in map {
                let naming =
                    naming.map_err(|e| DecodeError::MalformedNameSection(e.to_string()))?;
                names.insert(naming.index, naming.name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::SimpleGasPolicy;

    fn load(source: &str) -> Module {
        Module::load(wat::parse_str(source).unwrap()).unwrap()
    }

    #[test]
    fn identifier_is_content_derived() {
        let bytes = wat::parse_str("(module)").unwrap();
        let a = Module::load(bytes.clone()).unwrap();
        let b = Module::load(bytes).unwrap();
        assert_eq!(a.identifier, b.identifier);

        let c = load(r#"(module (func))"#);
        assert_ne!(a.identifier, c.identifier);
    }

    #[test]
    fn function_names_come_from_the_name_section() {
        let module = load(
            r#"(module
                (func $alpha)
                (func $beta))"#,
        );
        assert_eq!(module.function_names.get(&0).unwrap(), "alpha");
        assert_eq!(module.function_names.get(&1).unwrap(), "beta");
    }

    #[test]
    fn compiles_every_function() {
        let module = load(
            r#"(module
                (import "env" "host" (func (param i64) (result i64)))
                (func (result i32) (i32.const 1))
                (func))"#,
        );
        let code = module.compile_for_interpreter(None).unwrap();
        assert_eq!(code.len(), 3);
        // The shim occupies the import slot.
        assert_eq!(code[0].num_params, 1);
        assert_eq!(code[0].num_returns, 1);
        assert_eq!(code[1].num_returns, 1);
        assert_eq!(code[2].num_returns, 0);
    }

    #[test]
    fn shim_body_is_invoke_then_return() {
        let module = load(
            r#"(module
                (import "env" "host" (func (param i64) (result i64))))"#,
        );
        let code = module.compile_for_interpreter(None).unwrap();
        let shim = &code[0];
        assert_eq!(shim.bytes[4], Opcode::InvokeImport as u8);
        // target u32 + op + import id u32, then the return instruction.
        assert_eq!(shim.bytes[9 + 4], Opcode::ReturnValue as u8);
        assert_eq!(shim.num_regs, 2);
    }

    #[test]
    fn void_import_shim_returns_void() {
        let module = load(r#"(module (import "env" "host" (func)))"#);
        let code = module.compile_for_interpreter(None).unwrap();
        assert_eq!(code[0].bytes[9 + 4], Opcode::ReturnVoid as u8);
    }

    #[test]
    fn gas_policy_reaches_compiled_bytes() {
        let module = load(r#"(module (func (result i32) (i32.const 1)))"#);
        let without = module.compile_for_interpreter(None).unwrap();
        let with = module
            .compile_for_interpreter(Some(&SimpleGasPolicy {
                gas_per_instruction: 1,
            }))
            .unwrap();
        assert!(with[0].bytes.len() > without[0].bytes.len());
        assert_eq!(with[0].bytes[4], Opcode::AddGas as u8);
    }

    #[test]
    fn num_regs_covers_every_referenced_register() {
        let module = load(
            r#"(module (func (result i32)
                i32.const 1
                i32.const 2
                i32.add
                i32.const 3
                i32.add))"#,
        );
        let code = module.compile_for_interpreter(None).unwrap();
        assert!(code[0].num_regs >= 2);
    }
}
