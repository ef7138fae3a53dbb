//! Machine configuration.
//!
//! Zero means "unbounded" for every limit except `default_*`, which only
//! apply when the module imports its memory or table and the engine has to
//! synthesize one. The environment persists as pretty-printed JSON under
//! `<dataDir>/config/environment.json`.

use cinder_common::{config_dir, create_dir_if_missing};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Configuration of a virtual machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Cap on linear memory, in 65536-byte pages.
    pub max_memory_pages: usize,
    /// Cap on function-table entries.
    pub max_table_size: usize,
    /// Cap on the sum of regs + locals across live frames.
    pub max_value_slots: usize,
    /// Hard frame-stack depth limit (0: bounded only by the fixed stack).
    pub max_call_stack_depth: usize,
    /// Pages synthesized when the module imports its memory.
    pub default_memory_pages: usize,
    /// Entries synthesized when the module imports its table.
    pub default_table_size: usize,
    /// Gas budget; exceeding it traps or suspends.
    pub gas_limit: u64,
    /// Rewrite every float opcode to a trap at compile time.
    pub disable_floating_point: bool,
    /// On gas exhaustion, suspend instead of trapping.
    pub return_on_gas_limit_exceeded: bool,
}

/// Errors from environment serialization and persistence.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment io: {0}")]
    Io(#[from] io::Error),
    #[error("environment encoding: {0}")]
    Json(#[from] serde_json::Error),
}

impl Environment {
    /// Pretty-printed JSON form.
    pub fn to_json_string(&self) -> Result<String, EnvError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pretty-printed JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EnvError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse an environment from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Environment, EnvError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write to `<data_dir>/config/environment.json`, creating directories
    /// as needed.
    pub fn write_to(&self, data_dir: &Path) -> Result<(), EnvError> {
        let dir = config_dir(data_dir);
        create_dir_if_missing(&dir)?;
        fs::write(dir.join("environment.json"), self.to_json_bytes()?)?;
        Ok(())
    }

    /// Read back from `<data_dir>/config/environment.json`.
    pub fn read_from(data_dir: &Path) -> Result<Environment, EnvError> {
        let bytes = fs::read(config_dir(data_dir).join("environment.json"))?;
        Environment::from_json_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Environment {
        Environment {
            max_memory_pages: 64,
            max_table_size: 1024,
            gas_limit: 10_000,
            default_memory_pages: 128,
            default_table_size: 65536,
            return_on_gas_limit_exceeded: true,
            ..Environment::default()
        }
    }

    #[test]
    fn default_is_unbounded() {
        let env = Environment::default();
        assert_eq!(env.max_memory_pages, 0);
        assert_eq!(env.gas_limit, 0);
        assert!(!env.disable_floating_point);
    }

    #[test]
    fn json_roundtrip() {
        let env = sample();
        let bytes = env.to_json_bytes().unwrap();
        assert_eq!(Environment::from_json_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn json_is_stable_across_encodings() {
        let env = sample();
        assert_eq!(
            env.to_json_string().unwrap(),
            sample().to_json_string().unwrap()
        );
    }

    #[test]
    fn persists_under_config_dir() {
        let tmp = TempDir::new().unwrap();
        let env = sample();
        env.write_to(tmp.path()).unwrap();
        assert!(tmp.path().join("config/environment.json").is_file());
        assert_eq!(Environment::read_from(tmp.path()).unwrap(), env);
    }

    #[test]
    fn read_missing_config_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(Environment::read_from(tmp.path()).is_err());
    }
}
