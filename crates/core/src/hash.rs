use sha2::{Digest, Sha256};

/// Computes a deterministic SHA-256 hash over serialized archive bytes.
///
/// Always called on the untransformed payload, before compression or
/// encryption, so the same archive body yields the same checksum regardless
/// of which transforms are enabled.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}
