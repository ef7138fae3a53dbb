//! The virtual machine: frames, linear memory, globals, function table,
//! and the drivers that push it through the dispatch loop.
//!
//! Execution is strictly single-threaded and cooperative. `execute` runs
//! until the machine exits, a host import suspends it, or gas runs out in
//! suspend mode; `run` and `run_with_gas_limit` loop `execute`, invoking
//! the pending import between activations. Misusing the driver surface
//! (re-entering `execute`, igniting a running machine, leaving a delegate
//! pending) is a caller bug and panics rather than trapping.

use crate::environment::Environment;
use crate::import::{FunctionImport, ImportResolver};
use crate::init_expr::eval_init_expr;
use crate::trap::{ExitError, Trap};
use cinder_compiler::error::CompileError;
use cinder_compiler::gas::GasPolicy;
use cinder_compiler::module::{InterpreterCode, Module};
use cinder_compiler::wasm::{ExportKind, ImportKind, MemoryLimits, TableLimits};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Size of one linear-memory page.
pub const WASM_PAGE_SIZE: usize = 65536;

/// Fixed capacity of the preallocated frame stack.
pub const DEFAULT_CALL_STACK_SIZE: usize = 512;

/// Fill value for table slots no element segment covered.
pub(crate) const UNINITIALIZED_TABLE_ENTRY: u32 = 0xFFFF_FFFF;

/// Errors from machine construction and instantiation.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("max table size exceeded")]
    MaxTableSizeExceeded,

    #[error("max memory pages exceeded")]
    MaxMemoryExceeded,

    #[error("element segment out of bounds")]
    ElementSegmentOutOfBounds,

    #[error("data segment out of bounds")]
    DataSegmentOutOfBounds,

    #[error("malformed initializer expression")]
    InvalidInitExpression,
}

/// One activation record. Registers and locals alias into a single slab
/// owned by the frame for the duration of the activation.
#[derive(Debug, Default)]
pub struct Frame {
    pub function_id: usize,
    pub(crate) num_regs: usize,
    pub(crate) values: Vec<i64>,
    /// Byte offset into the function's compiled code.
    pub ip: usize,
    /// Register in the caller's frame receiving the return value.
    pub return_reg: usize,
    pub continuation: i32,
}

impl Frame {
    fn blank() -> Frame {
        Frame::default()
    }

    pub(crate) fn init(&mut self, function_id: usize, code: &InterpreterCode) {
        self.function_id = function_id;
        self.num_regs = code.num_regs;
        self.values = vec![0; code.num_regs + code.num_params + code.num_locals];
        self.ip = 0;
        self.return_reg = 0;
        self.continuation = 0;
    }

    /// Registers of this activation (slot 0 is the reserved "no value").
    pub fn regs(&self) -> &[i64] {
        &self.values[..self.num_regs]
    }

    pub fn regs_mut(&mut self) -> &mut [i64] {
        &mut self.values[..self.num_regs]
    }

    /// Parameters followed by declared locals.
    pub fn locals(&self) -> &[i64] {
        &self.values[self.num_regs..]
    }

    pub fn locals_mut(&mut self) -> &mut [i64] {
        &mut self.values[self.num_regs..]
    }
}

/// A host-import call captured between `execute` activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingImport {
    pub import_id: usize,
    /// Register in the suspended frame receiving the import's return.
    pub return_reg: usize,
}

/// A loaded, instantiated machine.
pub struct VirtualMachine {
    pub environment: Environment,
    pub module: Arc<Module>,
    pub function_code: Arc<Vec<InterpreterCode>>,
    pub function_imports: Vec<FunctionImport>,
    pub call_stack: Vec<Frame>,
    /// Index of the active frame; -1 when the stack is empty.
    pub current_frame: isize,
    pub table: Vec<u32>,
    pub globals: Vec<i64>,
    pub memory: Vec<u8>,
    pub num_value_slots: usize,
    /// Merge slot threaded between jumps and phi projections.
    pub yielded: i64,
    pub inside_execute: bool,
    pub delegate: Option<PendingImport>,
    pub exited: bool,
    pub exit_error: Option<ExitError>,
    pub return_value: i64,
    pub gas: u64,
    pub gas_limit_exceeded: bool,
}

impl VirtualMachine {
    /// Load, compile, and instantiate a module.
    ///
    /// Panics if the resolver denies an import the module declares.
    pub fn new(
        code: &[u8],
        environment: Environment,
        resolver: &dyn ImportResolver,
        gas_policy: Option<&dyn GasPolicy>,
    ) -> Result<VirtualMachine, VmError> {
        let mut module = Module::load(code.to_vec())?;
        module.disable_floating_point = environment.disable_floating_point;
        let function_code = module.compile_for_interpreter(gas_policy)?;

        let mut function_imports = Vec::new();
        let mut globals: Vec<i64> = Vec::new();
        let mut imported_table: Option<TableLimits> = None;
        let mut imported_memory: Option<MemoryLimits> = None;

        for import in &module.base.imports {
            match import.kind {
                ImportKind::Func { .. } => {
                    function_imports.push(FunctionImport {
                        module_name: import.module.clone(),
                        field_name: import.field.clone(),
                        func: resolver.resolve_func(&import.module, &import.field),
                    });
                }
                ImportKind::Global { .. } => {
                    globals.push(resolver.resolve_global(&import.module, &import.field));
                }
                // Imported tables and memories are satisfied by a
                // synthesized internal section sized from the environment.
                ImportKind::Table(_) => {
                    imported_table = Some(TableLimits {
                        initial: environment.default_table_size as u32,
                        maximum: None,
                    });
                }
                ImportKind::Memory(_) => {
                    imported_memory = Some(MemoryLimits {
                        initial: environment.default_memory_pages as u32,
                        maximum: None,
                    });
                }
            }
        }

        for global in &module.base.globals {
            let value = eval_init_expr(&global.init, &globals)?;
            globals.push(value);
        }

        let mut table: Vec<u32> = Vec::new();
        if let Some(limits) = module.base.table.or(imported_table) {
            if environment.max_table_size != 0
                && limits.initial as usize > environment.max_table_size
            {
                return Err(VmError::MaxTableSizeExceeded);
            }
            table = vec![UNINITIALIZED_TABLE_ENTRY; limits.initial as usize];
            for segment in &module.base.elements {
                let offset = eval_init_expr(&segment.offset, &globals)? as u32 as usize;
                let end = offset
                    .checked_add(segment.functions.len())
                    .ok_or(VmError::ElementSegmentOutOfBounds)?;
                if end > table.len() {
                    return Err(VmError::ElementSegmentOutOfBounds);
                }
                table[offset..end].copy_from_slice(&segment.functions);
            }
        }

        let mut memory: Vec<u8> = Vec::new();
        if let Some(limits) = module.base.memory.or(imported_memory) {
            let pages = limits.initial as usize;
            if environment.max_memory_pages != 0 && pages > environment.max_memory_pages {
                return Err(VmError::MaxMemoryExceeded);
            }
            memory = vec![0; pages * WASM_PAGE_SIZE];
            for segment in &module.base.data {
                let offset = eval_init_expr(&segment.offset, &globals)? as u32 as usize;
                let end = offset
                    .checked_add(segment.bytes.len())
                    .ok_or(VmError::DataSegmentOutOfBounds)?;
                if end > memory.len() {
                    return Err(VmError::DataSegmentOutOfBounds);
                }
                memory[offset..end].copy_from_slice(&segment.bytes);
            }
        }

        tracing::debug!(
            table = table.len(),
            memory_pages = memory.len() / WASM_PAGE_SIZE,
            globals = globals.len(),
            "machine instantiated"
        );

        Ok(VirtualMachine {
            environment,
            module: Arc::new(module),
            function_code: Arc::new(function_code),
            function_imports,
            call_stack: (0..DEFAULT_CALL_STACK_SIZE).map(|_| Frame::blank()).collect(),
            current_frame: -1,
            table,
            globals,
            memory,
            num_value_slots: 0,
            yielded: 0,
            inside_execute: false,
            delegate: None,
            exited: true,
            exit_error: None,
            return_value: 0,
            gas: 0,
            gas_limit_exceeded: false,
        })
    }

    /// Look up an exported function by name.
    pub fn get_function_export(&self, name: &str) -> Option<usize> {
        self.module
            .base
            .exports
            .iter()
            .find(|export| export.kind == ExportKind::Func && export.name == name)
            .map(|export| export.index as usize)
    }

    /// Look up an exported global by name.
    pub fn get_global_export(&self, name: &str) -> Option<usize> {
        self.module
            .base
            .exports
            .iter()
            .find(|export| export.kind == ExportKind::Global && export.name == name)
            .map(|export| export.index as usize)
    }

    /// The active frame. Panics if the frame pointer is out of range or the
    /// configured depth limit has been blown.
    pub fn active_frame(&self) -> &Frame {
        let index = self.frame_index();
        &self.call_stack[index]
    }

    pub fn active_frame_mut(&mut self) -> &mut Frame {
        let index = self.frame_index();
        &mut self.call_stack[index]
    }

    fn frame_index(&self) -> usize {
        assert!(self.current_frame >= 0, "no active frame");
        let index = self.current_frame as usize;
        assert!(index < self.call_stack.len(), "call stack overflow");
        if self.environment.max_call_stack_depth != 0 {
            assert!(
                index < self.environment.max_call_stack_depth,
                "max call stack depth exceeded"
            );
        }
        index
    }

    /// Push the entry frame for function `function_id`.
    ///
    /// Panics if the machine is mid-run, previously trapped, or the
    /// parameter count disagrees with the function's arity. An entry frame
    /// that blows the value-slot limit is not misuse: it traps through the
    /// normal exit path, like any frame pushed by a call.
    pub fn ignite(&mut self, function_id: usize, params: &[i64]) {
        assert!(
            self.exit_error.is_none(),
            "last execution exited with an error; cannot ignite"
        );
        assert!(self.current_frame == -1, "call stack not empty; cannot ignite");

        let codes = Arc::clone(&self.function_code);
        let code = &codes[function_id];
        assert_eq!(
            code.num_params,
            params.len(),
            "param count mismatch for function {function_id}"
        );

        self.return_value = 0;
        if let Err(trap) = self.charge_value_slots(code) {
            self.exited = true;
            self.exit_error = Some(ExitError::Trap(trap));
            return;
        }
        self.exited = false;
        self.current_frame = 0;
        let frame = &mut self.call_stack[0];
        frame.init(function_id, code);
        frame.locals_mut()[..params.len()].copy_from_slice(params);
    }

    /// Account the slab of a frame about to be created.
    pub(crate) fn charge_value_slots(&mut self, code: &InterpreterCode) -> Result<(), Trap> {
        let slots = code.num_regs + code.num_params + code.num_locals;
        if self.environment.max_value_slots != 0
            && self.num_value_slots + slots > self.environment.max_value_slots
        {
            return Err(Trap::MaxValueSlotsExceeded);
        }
        self.num_value_slots += slots;
        Ok(())
    }

    /// Release the active frame's slab.
    pub(crate) fn destroy_frame(&mut self, index: usize) {
        let frame = &mut self.call_stack[index];
        self.num_value_slots -= frame.values.len();
        frame.values = Vec::new();
        frame.num_regs = 0;
    }

    /// Add `delta` to the gas counter, checking overflow and the configured
    /// limit. Returns `false` when the limit was hit in suspend mode.
    pub fn add_and_check_gas(&mut self, delta: u64) -> Result<bool, Trap> {
        let new_gas = self.gas.wrapping_add(delta);
        if new_gas < self.gas {
            return Err(Trap::GasOverflow);
        }
        if self.environment.gas_limit != 0 && new_gas > self.environment.gas_limit {
            if self.environment.return_on_gas_limit_exceeded {
                return Ok(false);
            }
            return Err(Trap::GasLimitExceeded);
        }
        self.gas = new_gas;
        Ok(true)
    }

    /// Invoke and clear the pending host-import call. A panic inside the
    /// host callback exits the machine instead of unwinding the driver.
    pub fn run_delegate(&mut self) {
        let Some(pending) = self.delegate.take() else {
            return;
        };
        let import = Arc::clone(&self.function_imports[pending.import_id].func);
        match panic::catch_unwind(AssertUnwindSafe(|| import(self))) {
            Ok(value) => {
                self.active_frame_mut().regs_mut()[pending.return_reg] = value;
            }
            Err(payload) => {
                tracing::warn!("host import panicked");
                self.exited = true;
                self.exit_error = Some(ExitError::HostPanic(panic_message(payload)));
            }
        }
    }

    /// Ignite then drive `execute` until the machine exits or suspends for
    /// gas. Returns the function's return value.
    pub fn run(&mut self, function_id: usize, params: &[i64]) -> Result<i64, ExitError> {
        self.ignite(function_id, params);
        while !self.exited {
            self.execute();
            if self.delegate.is_some() {
                self.run_delegate();
            }
            if self.gas_limit_exceeded {
                break;
            }
        }
        if let Some(error) = self.exit_error.clone() {
            return Err(error);
        }
        Ok(self.return_value)
    }

    /// Like [`run`](Self::run), additionally bounding the number of
    /// dispatch-loop activations as a coarse wall-clock substitute.
    pub fn run_with_gas_limit(
        &mut self,
        function_id: usize,
        limit: usize,
        params: &[i64],
    ) -> Result<i64, ExitError> {
        let mut activations = 0;
        self.ignite(function_id, params);
        while !self.exited {
            self.execute();
            if self.delegate.is_some() {
                self.run_delegate();
            }
            if self.gas_limit_exceeded {
                break;
            }
            activations += 1;
            if activations >= limit {
                return Err(ExitError::Trap(Trap::GasLimitExceeded));
            }
        }
        if let Some(error) = self.exit_error.clone() {
            return Err(error);
        }
        Ok(self.return_value)
    }

    /// Render the active call stack, innermost frame first.
    pub fn stack_trace(&self) -> String {
        let mut out = String::from("----- begin stack trace -----\n");
        let mut index = self.current_frame;
        while index >= 0 {
            let frame = &self.call_stack[index as usize];
            let name = self
                .module
                .function_names
                .get(&(frame.function_id as u32))
                .map(String::as_str)
                .unwrap_or("<unknown>");
            let _ = writeln!(out, "<{}> [{}] {}", index, frame.function_id, name);
            index -= 1;
        }
        out.push_str("----- end stack trace -----");
        out
    }

    pub fn print_stack_trace(&self) {
        eprintln!("{}", self.stack_trace());
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
