//! SHA-256 helpers shared by fingerprinting and change detection.

/// Lowercase hex encoding of arbitrary bytes.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 of `data`, hex encoded.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&hmac_sha256::Hash::hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
