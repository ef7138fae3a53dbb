//! Shared building blocks for the cinder engine.
//!
//! This crate provides the two concerns every other cinder crate leans on:
//!
//! - [`hash`] — the 32-byte content digest used for module identifiers,
//!   snapshot identities, and state-database keys
//! - [`io`] — data-directory resolution and creation helpers
//!
//! It uses `blake3` for the digest primitive and `hex` for rendering; no
//! other runtime dependencies.

pub mod hash;
pub mod io;

pub use hash::{double_hash, hash, hash_hex, hash_n, Digest, DIGEST_LEN};
pub use io::{config_dir, create_dir_if_missing, default_data_dir};
