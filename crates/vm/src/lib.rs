//! Register-machine interpreter with gas metering and content-addressed
//! state snapshots.
//!
//! A [`VirtualMachine`] owns its memory, table, globals, and frame stack
//! for the duration of a run; the module and compiled code are immutable
//! and shared. Execution is single-threaded and cooperative: the dispatch
//! loop suspends for host imports and (optionally) for gas exhaustion, and
//! traps convert into the machine's exit error.
//!
//! Snapshots ([`StateEntry`]) deep-copy the mutable state and are arranged
//! into a nonce-ordered tree ([`StateDatabase`]) with a movable working
//! root.

pub mod environment;
pub mod execute;
pub mod import;
pub mod init_expr;
pub mod machine;
pub mod state;
pub mod statedb;
pub mod stateio;
pub mod trap;

pub use environment::{EnvError, Environment};
pub use import::{FunctionImport, ImportFunc, ImportResolver, NopResolver};
pub use machine::{
    Frame, PendingImport, VirtualMachine, VmError, DEFAULT_CALL_STACK_SIZE, WASM_PAGE_SIZE,
};
pub use state::{SavedFrame, StateEntry, StateIoError, StateNode};
pub use statedb::{StateDatabase, StateError};
pub use trap::{ExitError, Trap};
