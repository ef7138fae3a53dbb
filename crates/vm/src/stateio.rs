//! Persistence of the snapshot tree.
//!
//! The database is written as a self-describing binary stream (bincode)
//! under `<dataDir>/state/<id-hex>.db`; the key is the database identity
//! stamped at creation, so re-reading and re-hashing a stored database must
//! reproduce its file name.

use crate::state::StateIoError;
use crate::statedb::StateDatabase;
use cinder_common::create_dir_if_missing;
use std::fs;
use std::path::{Path, PathBuf};

impl StateDatabase {
    /// Self-describing binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateIoError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a database previously produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<StateDatabase, StateIoError> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn db_file(data_dir: &Path, id_hex: &str) -> PathBuf {
        data_dir.join("state").join(format!("{id_hex}.db"))
    }

    /// Write to `<data_dir>/state/<id-hex>.db`, creating directories as
    /// needed.
    pub fn write_to(&self, data_dir: &Path) -> Result<PathBuf, StateIoError> {
        let dir = data_dir.join("state");
        create_dir_if_missing(&dir)?;
        let path = StateDatabase::db_file(data_dir, &hex::encode(self.id));
        fs::write(&path, self.to_bytes()?)?;
        tracing::debug!(path = %path.display(), states = self.states.len(), "state database persisted");
        Ok(path)
    }

    /// Read a database back by its hex identity. The loaded database keeps
    /// persisting to `data_dir`.
    pub fn read_from(data_dir: &Path, id_hex: &str) -> Result<StateDatabase, StateIoError> {
        let bytes = fs::read(StateDatabase::db_file(data_dir, id_hex))?;
        let mut db = StateDatabase::from_bytes(&bytes)?;
        db.data_dir = Some(data_dir.to_path_buf());
        Ok(db)
    }
}
