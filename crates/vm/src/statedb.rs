//! The snapshot tree: an append-only store of state entries with a
//! checkout pointer.
//!
//! Entries live in an arena (`states`); tree edges are arena indices kept
//! in each node's `children`. The root is index 0. `working_root` selects
//! the parent of the next insertion, which makes checkout of an earlier
//! snapshot a pointer move rather than a history rewrite.

use crate::state::StateEntry;
use cinder_common::{hash, Digest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by snapshot-tree operations. These are values, never
/// traps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no state entries found")]
    NilStateEntry,

    #[error("state entry already exists")]
    StateAlreadyExists,

    #[error("invalid state nonce")]
    InvalidStateNonce,

    #[error("state persistence failed: {0}")]
    Persist(String),
}

/// Append-only tree of machine snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDatabase {
    pub states: Vec<StateEntry>,
    /// Arena index of the initial snapshot (always 0).
    pub state_root: usize,
    /// Arena index of the snapshot future insertions branch from.
    pub working_root: usize,
    /// Digest of the root entry's canonical bytes.
    pub merkle_root: Digest,
    /// Digest of the whole database at creation; immutable afterwards.
    pub id: Digest,
    /// Persistence target; in-memory only when unset. Not part of identity.
    #[serde(skip)]
    pub data_dir: Option<PathBuf>,
}

impl StateDatabase {
    /// Build a database around an initial snapshot.
    pub fn new(root: StateEntry) -> StateDatabase {
        let merkle_root = hash(&root.canonical_bytes());
        let mut db = StateDatabase {
            states: vec![root],
            state_root: 0,
            working_root: 0,
            merkle_root,
            id: [0; 32],
            data_dir: None,
        };
        db.id = hash(&db.canonical_bytes());
        db
    }

    /// Persist to `dir` after every mutation.
    pub fn with_data_dir(mut self, dir: PathBuf) -> StateDatabase {
        self.data_dir = Some(dir);
        self
    }

    /// Canonical encoding with the identity field zeroed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut copy = self.clone();
        copy.id = [0; 32];
        copy.data_dir = None;
        serde_json::to_vec_pretty(&copy).expect("state database serializes")
    }

    /// Insert `entry` under `parent` (the working root when `None`).
    ///
    /// Fails when the entry's id is already present, or its nonce is not
    /// strictly greater than the parent's. On success the entry becomes the
    /// new working root and the database is persisted if a data directory
    /// is configured. Returns the entry's arena index.
    pub fn add_state_entry(
        &mut self,
        entry: StateEntry,
        parent: Option<usize>,
    ) -> Result<usize, StateError> {
        let parent = parent.unwrap_or(self.working_root);
        let parent_entry = self.states.get(parent).ok_or(StateError::NilStateEntry)?;

        if self.states.iter().any(|existing| existing.id == entry.id) {
            return Err(StateError::StateAlreadyExists);
        }
        if entry.nonce <= parent_entry.nonce {
            return Err(StateError::InvalidStateNonce);
        }

        let index = self.states.len();
        self.states.push(entry);
        self.states[parent].state.children.push(index);
        self.working_root = index;
        tracing::debug!(index, parent, "state entry added");

        if let Some(dir) = self.data_dir.clone() {
            self.write_to(&dir)
                .map_err(|err| StateError::Persist(err.to_string()))?;
        }
        Ok(index)
    }

    /// Content-addressed membership lookup (linear scan).
    pub fn query_state(&self, id: &Digest) -> Result<&StateEntry, StateError> {
        self.states
            .iter()
            .find(|entry| entry.id == *id)
            .ok_or(StateError::NilStateEntry)
    }

    /// Arena index of an entry by id.
    pub fn index_of(&self, id: &Digest) -> Option<usize> {
        self.states.iter().position(|entry| entry.id == *id)
    }

    /// Descend from the root, following the greatest-nonce child at each
    /// step, until a leaf.
    pub fn find_max(&self) -> &StateEntry {
        let mut current = self.state_root;
        loop {
            let children = &self.states[current].state.children;
            let mut best: Option<usize> = None;
            for &child in children {
                let better = match best {
                    Some(chosen) => self.states[child].nonce > self.states[chosen].nonce,
                    None => true,
                };
                if better {
                    best = Some(child);
                }
            }
            match best {
                Some(child) => current = child,
                None => return &self.states[current],
            }
        }
    }

    /// Check out a prior snapshot: future insertions branch from it.
    /// History is untouched.
    pub fn set_working_root(&mut self, index: usize) -> Result<(), StateError> {
        if index >= self.states.len() {
            return Err(StateError::NilStateEntry);
        }
        self.working_root = index;
        Ok(())
    }

    /// The snapshot future insertions branch from.
    pub fn working_root(&self) -> &StateEntry {
        &self.states[self.working_root]
    }
}
