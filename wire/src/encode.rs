//! DNS-safe byte encoding.
//!
//! Labels travel through resolvers that are free to change case, so the
//! tunnel alphabet must survive case folding. Base32 (RFC 4648, no
//! padding) does, at a 8/5 expansion instead of hex's 2x. Labels are
//! emitted lowercase to blend in with ordinary query names and folded
//! back to the canonical alphabet before decoding.

use crate::error::CodecError;

const ALPHABET: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Encode raw bytes as one lowercase base32 string.
pub fn encode_label(bytes: &[u8]) -> String {
    base32::encode(ALPHABET, bytes).to_ascii_lowercase()
}

/// Decode a base32 string in either case back to raw bytes.
pub fn decode_label(label: &str) -> Result<Vec<u8>, CodecError> {
    base32::decode(ALPHABET, &label.to_ascii_uppercase()).ok_or(CodecError::Label)
}

/// How many raw bytes fit in an encoded string of `encoded_len` chars.
pub fn label_capacity(encoded_len: usize) -> usize {
    encoded_len * 5 / 8
}

/// Encoded length of `raw_len` bytes.
pub fn encoded_len(raw_len: usize) -> usize {
    (raw_len * 8 + 4) / 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_label(&encode_label(&data)).unwrap(), data);
    }

    #[test]
    fn empty_round_trips() {
        assert_eq!(encode_label(b""), "");
        assert_eq!(decode_label("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn output_is_lowercase_label_alphabet() {
        let label = encode_label(&[0xde, 0xad, 0xbe, 0xef, 0x42]);
        assert!(label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn decoding_survives_case_folding() {
        let data = b"case folding resolver".to_vec();
        let label = encode_label(&data);
        assert_eq!(decode_label(&label.to_ascii_uppercase()).unwrap(), data);
        assert_eq!(decode_label(&label).unwrap(), data);
    }

    #[test]
    fn invalid_characters_rejected() {
        assert!(decode_label("not-base32!").is_err());
    }

    #[test]
    fn capacity_matches_encoded_len() {
        // 63-char label: the largest payload a single DNS label carries.
        assert_eq!(label_capacity(63), 39);
        assert_eq!(encoded_len(39), 63);
        for raw in 0..200 {
            assert!(encoded_len(label_capacity(raw)) <= raw.max(1));
        }
    }
}
