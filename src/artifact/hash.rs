use sha2::{Digest, Sha256};
use std::path::Path;

use super::types::{ContentHash, StoreError, StoreResult};

/// SHA-256 of `bytes`; a pure function of the content
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash::from_hex(format!("{:x}", Sha256::digest(bytes)))
}

/// Hash a file already on disk
pub fn hash_file(path: &Path) -> StoreResult<ContentHash> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(content_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let bytes = b"screenshot bytes".to_vec();
        assert_eq!(content_hash(&bytes), content_hash(&bytes.clone()));
    }

    #[test]
    fn test_single_byte_change_changes_hash() {
        let a = vec![0u8; 4096];
        let mut b = a.clone();
        b[2048] = 1;
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"").short(), "e3b0c442");
    }
}
