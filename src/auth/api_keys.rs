//! Agent API keys
//!
//! Format: `ak_<agent_name>_<32 hex chars>`. Only the sha256 digest and a
//! 20-character prefix are persisted; the raw key is returned exactly once
//! at registration (or rotation).

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the stored display prefix
const PREFIX_LEN: usize = 20;

/// A freshly minted key plus its storable parts
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub full_key: String,
    pub key_hash: String,
    pub key_prefix: String,
}

/// Mint a new API key for an agent.
pub fn generate_api_key(agent_name: &str) -> GeneratedKey {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);

    let full_key = format!("ak_{}_{}", agent_name, hex::encode(random));
    let key_hash = hash_api_key(&full_key);
    let key_prefix = full_key.chars().take(PREFIX_LEN).collect();

    GeneratedKey {
        full_key,
        key_hash,
        key_prefix,
    }
}

/// Hash a raw API key for storage or lookup.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = generate_api_key("demand");
        assert!(key.full_key.starts_with("ak_demand_"));
        let random_part = key.full_key.strip_prefix("ak_demand_").unwrap();
        assert_eq!(random_part.len(), 32);
        assert!(random_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_round_trip() {
        let key = generate_api_key("spend");
        assert_eq!(hash_api_key(&key.full_key), key.key_hash);
        assert_eq!(key.key_hash.len(), 64);
    }

    #[test]
    fn test_prefix_never_exposes_whole_key() {
        let key = generate_api_key("a");
        assert_eq!(key.key_prefix.len(), 20);
        assert!(key.full_key.len() > key.key_prefix.len());
        assert!(key.full_key.starts_with(&key.key_prefix));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_api_key("demand");
        let b = generate_api_key("demand");
        assert_ne!(a.full_key, b.full_key);
        assert_ne!(a.key_hash, b.key_hash);
    }
}
