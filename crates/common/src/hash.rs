//! Content hashing.
//!
//! Every identity in cinder — module identifiers, snapshot ids, state
//! database keys — is a 32-byte blake3 digest of some canonical byte
//! encoding. The digest type is a plain array so it can be compared,
//! copied, and serialized without ceremony.

/// Length in bytes of a [`Digest`].
pub const DIGEST_LEN: usize = 32;

/// A 32-byte content digest.
pub type Digest = [u8; DIGEST_LEN];

/// Hash a byte slice to a [`Digest`].
pub fn hash(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}

/// Hash a byte slice and render the digest as lowercase hex.
pub fn hash_hex(bytes: &[u8]) -> String {
    hex::encode(hash(bytes))
}

/// Hash a byte slice `n` times (each round hashes the previous digest).
///
/// `n = 0` returns the digest of the input itself.
pub fn hash_n(bytes: &[u8], n: u32) -> Digest {
    let mut digest = hash(bytes);
    for _ in 0..n {
        digest = hash(&digest);
    }
    digest
}

/// Hash of a hash.
pub fn double_hash(bytes: &[u8]) -> Digest {
    hash(&hash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_32_bytes() {
        assert_eq!(hash(b"cinder").len(), DIGEST_LEN);
    }

    #[test]
    fn deterministic() {
        assert_eq!(hash(b"abc"), hash(b"abc"));
        assert_ne!(hash(b"abc"), hash(b"abd"));
    }

    #[test]
    fn empty_input_hashes() {
        // The digest of no bytes is still a full-width digest.
        assert_eq!(hash(b"").len(), DIGEST_LEN);
    }

    #[test]
    fn hex_matches_digest() {
        let digest = hash(b"xyz");
        assert_eq!(hash_hex(b"xyz"), hex::encode(digest));
        assert_eq!(hash_hex(b"xyz").len(), DIGEST_LEN * 2);
    }

    #[test]
    fn hash_n_zero_is_single_hash() {
        assert_eq!(hash_n(b"abc", 0), hash(b"abc"));
    }

    #[test]
    fn hash_n_chains() {
        let once = hash(b"abc");
        assert_eq!(hash_n(b"abc", 1), hash(&once));
        assert_eq!(hash_n(b"abc", 2), hash(&hash(&once)));
    }

    #[test]
    fn double_hash_matches_two_rounds() {
        assert_eq!(double_hash(b"abc"), hash_n(b"abc", 1));
    }
}
