use sha1::Digest;

/// Which hash newly written artifacts are named by. Both kinds are always
/// accepted on read; this only drives writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashPolicy {
    /// 40-char SHA1, the historical default.
    #[default]
    Sha1,
    /// 64-char SHA3-256.
    Sha3,
}

/// Hash `bytes` under `policy` into lowercase hex.
pub fn hash_bytes(policy: HashPolicy, bytes: &[u8]) -> String {
    match policy {
        HashPolicy::Sha1 => {
            let mut h = sha1::Sha1::new();
            h.update(bytes);
            hex::encode(h.finalize())
        }
        HashPolicy::Sha3 => {
            let mut h = sha3::Sha3_256::new();
            h.update(bytes);
            hex::encode(h.finalize())
        }
    }
}

/// Does `bytes` hash to `uuid` under either accepted hash? Used to verify
/// supplied hashes and for verify-at-commit round-trips.
pub fn hash_matches(uuid: &str, bytes: &[u8]) -> bool {
    match uuid.len() {
        40 => hash_bytes(HashPolicy::Sha1, bytes) == uuid,
        64 => hash_bytes(HashPolicy::Sha3, bytes) == uuid,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_sha1_vector() {
        assert_eq!(
            hash_bytes(HashPolicy::Sha1, b"hello\n"),
            "f572d396fae9206628714fb2ce00f72e94f2258f"
        );
    }

    #[test]
    fn sha3_length_and_match() {
        let h = hash_bytes(HashPolicy::Sha3, b"hello\n");
        assert_eq!(h.len(), 64);
        assert!(hash_matches(&h, b"hello\n"));
        assert!(!hash_matches(&h, b"hello"));
    }
}
