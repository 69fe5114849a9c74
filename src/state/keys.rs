//! Byte-prefix layout of the persisted portal and committee state.
//!
//! Keys are `prefix ‖ first 20 bytes of blake3(natural_key)`; values are
//! JSON-encoded records. Prefixes are frozen, the same way metadata codes are.

pub const PORTAL_UTXO_PREFIX: u8 = 0x01;
pub const PORTAL_SHIELDING_PREFIX: u8 = 0x02;
pub const PORTAL_WAITING_UNSHIELD_PREFIX: u8 = 0x03;
pub const PORTAL_PROCESSED_UNSHIELD_PREFIX: u8 = 0x04;
pub const PORTAL_STATUS_PREFIX: u8 = 0x05;
pub const PORTAL_SUPPLY_PREFIX: u8 = 0x06;
pub const STAKER_INFO_PREFIX: u8 = 0x10;
pub const COMMITTEE_STATE_PREFIX: u8 = 0x11;

pub const KEY_HASH_LEN: usize = 20;

/// Domain-separated hash over the parts of a natural key.
pub fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

pub fn state_key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let digest = hash_parts(parts);
    let mut key = Vec::with_capacity(1 + KEY_HASH_LEN);
    key.push(prefix);
    key.extend_from_slice(&digest[..KEY_HASH_LEN]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefix_scoped_and_stable() {
        let a = state_key(PORTAL_UTXO_PREFIX, &[b"btc", b"tx", b"0"]);
        let b = state_key(PORTAL_UTXO_PREFIX, &[b"btc", b"tx", b"0"]);
        let c = state_key(PORTAL_SHIELDING_PREFIX, &[b"btc", b"tx", b"0"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0], PORTAL_UTXO_PREFIX);
        assert_eq!(a.len(), 1 + KEY_HASH_LEN);
    }

    #[test]
    fn part_boundaries_matter() {
        // Length framing keeps ("ab","c") distinct from ("a","bc").
        assert_ne!(hash_parts(&[b"ab", b"c"]), hash_parts(&[b"a", b"bc"]));
    }
}
