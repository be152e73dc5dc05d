//! Stable name hashing
//!
//! Property keys travel on the wire, so the hash must be identical on every
//! platform and every build. 64-bit FNV-1a fits: it is fixed-width and has no
//! per-process seed.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a of `name`'s UTF-8 bytes
pub const fn name_hash(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(name_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(name_hash("a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(name_hash("foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_usable_in_const_context() {
        const HEALTH: u64 = name_hash("health");
        assert_eq!(HEALTH, name_hash("health"));
        assert_ne!(HEALTH, name_hash("Health"));
    }
}
