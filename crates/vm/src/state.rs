//! Content-addressed snapshots of the mutable interpreter state.
//!
//! A snapshot deep-copies everything a run mutates: frames (with their code
//! bytes), the table, globals, memory, and the scalar machine flags.
//! Identity is the digest of a canonical encoding — pretty-printed JSON
//! with struct fields in declaration order — taken with the `id` field
//! zeroed. The encoding must stay deterministic or the store fragments.

use crate::environment::EnvError;
use crate::machine::VirtualMachine;
use crate::trap::ExitError;
use cinder_common::{create_dir_if_missing, hash, Digest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum StateIoError {
    #[error("state io: {0}")]
    Io(#[from] io::Error),
    #[error("state encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Deep copy of one activation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFrame {
    pub function_id: usize,
    pub code: Vec<u8>,
    pub regs: Vec<i64>,
    pub locals: Vec<i64>,
    pub ip: usize,
    pub return_reg: usize,
    pub continuation: i32,
}

/// The mutable interpreter state at one point in time, plus the snapshot
/// tree edges rooted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNode {
    pub call_stack: Vec<SavedFrame>,
    pub current_frame: isize,
    pub table: Vec<u32>,
    pub globals: Vec<i64>,
    pub memory: Vec<u8>,
    pub num_value_slots: usize,
    pub yielded: i64,
    pub inside_execute: bool,
    pub exited: bool,
    pub exit_error: Option<ExitError>,
    pub return_value: i64,
    pub gas: u64,
    pub gas_limit_exceeded: bool,
    /// Indices of child snapshots in the owning database.
    pub children: Vec<usize>,
    pub id: Digest,
}

impl StateNode {
    /// Deep-copy the machine's mutable state and stamp the node identity.
    pub fn capture(vm: &VirtualMachine) -> StateNode {
        let mut call_stack = Vec::new();
        let mut index = 0isize;
        while index <= vm.current_frame {
            let frame = &vm.call_stack[index as usize];
            call_stack.push(SavedFrame {
                function_id: frame.function_id,
                code: vm.function_code[frame.function_id].bytes.clone(),
                regs: frame.regs().to_vec(),
                locals: frame.locals().to_vec(),
                ip: frame.ip,
                return_reg: frame.return_reg,
                continuation: frame.continuation,
            });
            index += 1;
        }

        let mut node = StateNode {
            call_stack,
            current_frame: vm.current_frame,
            table: vm.table.clone(),
            globals: vm.globals.clone(),
            memory: vm.memory.clone(),
            num_value_slots: vm.num_value_slots,
            yielded: vm.yielded,
            inside_execute: vm.inside_execute,
            exited: vm.exited,
            exit_error: vm.exit_error.clone(),
            return_value: vm.return_value,
            gas: vm.gas,
            gas_limit_exceeded: vm.gas_limit_exceeded,
            children: Vec::new(),
            id: [0; 32],
        };
        node.id = hash(&node.canonical_bytes());
        node
    }

    /// Canonical encoding of this node (deterministic across runs).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("state node serializes")
    }
}

/// An immutable snapshot: state, nonce, and content identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: StateNode,
    pub nonce: u64,
    pub id: Digest,
}

impl StateEntry {
    /// Wrap a state node, stamping the entry identity over the encoding
    /// with a zeroed id.
    pub fn new(state: StateNode, nonce: u64) -> StateEntry {
        let mut entry = StateEntry {
            state,
            nonce,
            id: [0; 32],
        };
        entry.id = hash(&entry.canonical_bytes());
        entry
    }

    /// Snapshot a machine under the given nonce.
    pub fn capture(vm: &VirtualMachine, nonce: u64) -> StateEntry {
        StateEntry::new(StateNode::capture(vm), nonce)
    }

    /// Canonical encoding of this entry (deterministic across runs).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("state entry serializes")
    }
}

impl VirtualMachine {
    fn state_file(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("state_{}.ursa", hex::encode(self.module.identifier)))
    }

    /// Persist the mutable state (and the environment) under `data_dir`.
    /// The file name is derived from the module identifier, so byte-equal
    /// modules share a snapshot path.
    pub fn save_state(&self, data_dir: &Path) -> Result<PathBuf, StateIoError> {
        self.environment.write_to(data_dir)?;
        create_dir_if_missing(data_dir)?;
        let node = StateNode::capture(self);
        let path = self.state_file(data_dir);
        fs::write(&path, bincode::serialize(&node)?)?;
        tracing::debug!(path = %path.display(), "machine state saved");
        Ok(path)
    }

    /// Restore the mutable state previously saved under `data_dir`.
    pub fn load_state(&mut self, data_dir: &Path) -> Result<(), StateIoError> {
        let bytes = fs::read(self.state_file(data_dir))?;
        let node: StateNode = bincode::deserialize(&bytes)?;
        self.restore(&node);
        Ok(())
    }

    /// Overwrite the mutable state with a snapshot. The module and its
    /// compiled code are untouched; frames are rebuilt against them.
    pub fn restore(&mut self, node: &StateNode) {
        for frame in &mut self.call_stack {
            frame.values = Vec::new();
            frame.num_regs = 0;
        }
        for (index, saved) in node.call_stack.iter().enumerate() {
            let frame = &mut self.call_stack[index];
            frame.function_id = saved.function_id;
            frame.num_regs = saved.regs.len();
            frame.values = saved
                .regs
                .iter()
                .chain(saved.locals.iter())
                .copied()
                .collect();
            frame.ip = saved.ip;
            frame.return_reg = saved.return_reg;
            frame.continuation = saved.continuation;
        }
        self.current_frame = node.current_frame;
        self.table = node.table.clone();
        self.globals = node.globals.clone();
        self.memory = node.memory.clone();
        self.num_value_slots = node.num_value_slots;
        self.yielded = node.yielded;
        self.inside_execute = node.inside_execute;
        self.exited = node.exited;
        self.exit_error = node.exit_error.clone();
        self.return_value = node.return_value;
        self.gas = node.gas;
        self.gas_limit_exceeded = node.gas_limit_exceeded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::import::NopResolver;

    fn machine(source: &str) -> VirtualMachine {
        let bytes = wat::parse_str(source).unwrap();
        VirtualMachine::new(&bytes, Environment::default(), &NopResolver, None).unwrap()
    }

    #[test]
    fn capture_is_deterministic() {
        let vm = machine(r#"(module (memory 1) (func (result i32) (i32.const 1)))"#);
        let a = StateNode::capture(&vm);
        let b = StateNode::capture(&vm);
        assert_eq!(a.id, b.id);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn entry_identity_covers_the_nonce() {
        let vm = machine(r#"(module)"#);
        let a = StateEntry::capture(&vm, 0);
        let b = StateEntry::capture(&vm, 1);
        assert_eq!(a.state.id, b.state.id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn different_state_different_identity() {
        let vm = machine(r#"(module (memory 1))"#);
        let before = StateEntry::capture(&vm, 0);
        let mut vm = vm;
        vm.memory[0] = 7;
        let after = StateEntry::capture(&vm, 0);
        assert_ne!(before.id, after.id);
    }

    #[test]
    fn restore_round_trips_observable_fields() {
        let mut vm = machine(
            r#"(module
                (global (mut i64) (i64.const 5))
                (memory 1)
                (func $main (result i32) (i32.const 41))
                (export "main" (func $main)))"#,
        );
        let entry = vm.get_function_export("main").unwrap();
        let value = vm.run(entry, &[]).unwrap();
        assert_eq!(value, 41);

        let node = StateNode::capture(&vm);
        vm.memory[0] = 9;
        vm.gas = 77;
        vm.restore(&node);
        assert_eq!(vm.memory[0], 0);
        assert_eq!(vm.gas, 0);
        assert_eq!(vm.return_value, 41);
        assert!(vm.exited);

        let again = StateNode::capture(&vm);
        assert_eq!(again.id, node.id);
    }
}
