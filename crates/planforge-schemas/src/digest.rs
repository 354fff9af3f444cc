//! Stable content digests used by the fingerprinting component (spec.md
//! §4.E). BLAKE3, hex-encoded, with `\0`-separated framing so that
//! `["a", "bc"]` and `["ab", "c"]` never collide.

/// Hashes the given parts into a 64-character hex digest.
pub fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0u8]);
    }
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest(["a", "b"]), digest(["a", "b"]));
    }

    #[test]
    fn digest_respects_boundaries() {
        assert_ne!(digest(["a", "bc"]), digest(["ab", "c"]));
    }
}
