//! Hash utilities for the block-DAG
//! Provides the fixed-size digest used for block and transaction identifiers

use sha2::{Digest, Sha256};

/// 256-bit hash value - fixed size array for blockchain use
pub type Hash256 = [u8; 32];

/// The all-zero hash, used for the null outpoint and empty merkle trees
pub const ZERO_HASH: Hash256 = [0u8; 32];

/// Double-SHA256 hash
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// Hash the concatenation of two digests (merkle branch combination)
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buffer = [0u8; 64];
    buffer[..32].copy_from_slice(left);
    buffer[32..].copy_from_slice(right);
    hash256(&buffer)
}

/// Converts a hexadecimal string to a 32-byte array
pub fn hex_to_hash(hex: &str) -> Result<Hash256, hex::FromHexError> {
    let hex_str = hex.trim_start_matches("0x");
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }

    let mut result = [0u8; 32];
    result.copy_from_slice(&bytes);
    Ok(result)
}

/// Abbreviated hex form for log lines
pub fn short_hex(hash: &Hash256) -> String {
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_is_double_sha() {
        let single = Sha256::digest(b"dag");
        let double = Sha256::digest(single);
        assert_eq!(hash256(b"dag").as_slice(), double.as_slice());
    }

    #[test]
    fn test_hex_to_hash_rejects_short_input() {
        assert!(hex_to_hash("abcd").is_err());
        let hash = hash256(b"x");
        assert_eq!(hex_to_hash(&hex::encode(hash)).unwrap(), hash);
    }
}
