//! Host import resolution.

use crate::machine::VirtualMachine;
use std::sync::Arc;

/// A host callable. It reads its parameters from the current frame's locals
/// and may inspect or mutate the machine's memory; the return value is
/// ignored when the import's signature returns nothing.
pub type ImportFunc = Arc<dyn Fn(&mut VirtualMachine) -> i64 + Send + Sync>;

/// Supplies external functions and globals to a module.
pub trait ImportResolver {
    fn resolve_func(&self, module: &str, field: &str) -> ImportFunc;
    fn resolve_global(&self, module: &str, field: &str) -> i64;
}

/// A resolved function import, kept with its names for diagnostics.
#[derive(Clone)]
pub struct FunctionImport {
    pub module_name: String,
    pub field_name: String,
    pub func: ImportFunc,
}

impl std::fmt::Debug for FunctionImport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionImport({}.{})", self.module_name, self.field_name)
    }
}

/// Denies every import. Only valid for modules without imports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopResolver;

impl ImportResolver for NopResolver {
    fn resolve_func(&self, _module: &str, _field: &str) -> ImportFunc {
        panic!("func import not allowed")
    }

    fn resolve_global(&self, _module: &str, _field: &str) -> i64 {
        panic!("global import not allowed")
    }
}
