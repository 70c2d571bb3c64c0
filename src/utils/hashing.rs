use sha2::{Digest, Sha256};

/// Lowercase-hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase-hex SHA-256 over the UTF-8 encoding of a string.
pub fn sha256_hex_str(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // SHA-256("hello world")
        assert_eq!(
            sha256_hex_str("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_bytes_and_str_agree() {
        assert_eq!(sha256_hex(b"alpha"), sha256_hex_str("alpha"));
    }

    #[test]
    fn test_output_is_lowercase_hex() {
        let h = sha256_hex_str("anything");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
