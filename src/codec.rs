use crate::error::{Error, Result};

/// Decodes pairs of hex digits. Either case is accepted; an odd trailing digit
/// or any non-hex character is rejected.
pub fn hex_to_bin(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(Error::from)
}

/// Lowercase hex, two characters per byte.
pub fn bin_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a pool target into the 32-bit comparison value.
///
/// Up to four bytes are read little-endian and zero-extended. An eight-byte
/// target is reduced to its high word, which is what the comparison word of
/// the digest is measured against.
pub fn target_from_hex(text: &str) -> Result<u32> {
    let bytes = hex_to_bin(text)?;
    match bytes.len() {
        0..=4 => {
            let mut word = [0u8; 4];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(u32::from_le_bytes(word))
        }
        8 => {
            let mut wide = [0u8; 8];
            wide.copy_from_slice(&bytes);
            Ok((u64::from_le_bytes(wide) >> 32) as u32)
        }
        n => Err(Error::Malformed(format!("target must be 4 or 8 bytes, got {n}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hex_to_bin_mixed_case() {
        assert_eq!(hex_to_bin("00aBfF").unwrap(), vec![0x00, 0xab, 0xff]);
        assert_eq!(hex_to_bin("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_hex_to_bin_rejects_odd_length() {
        assert!(matches!(hex_to_bin("abc"), Err(Error::InvalidHex(_))));
        assert!(matches!(hex_to_bin("0"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_hex_to_bin_rejects_non_hex() {
        assert!(matches!(hex_to_bin("zz"), Err(Error::InvalidHex(_))));
        assert!(matches!(hex_to_bin("0g"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_bin_to_hex_lowercase() {
        assert_eq!(bin_to_hex(&[0xde, 0xad, 0xBE, 0x0f]), "deadbe0f");
    }

    #[test]
    fn test_target_widths() {
        assert_eq!(target_from_hex("ffffffff").unwrap(), 0xffff_ffff);
        assert_eq!(target_from_hex("b88d0600").unwrap(), 0x0006_8db8);
        assert_eq!(target_from_hex("ff").unwrap(), 0xff);
        assert_eq!(target_from_hex("00000000ffffff00").unwrap(), 0x00ff_ffff);
        assert!(matches!(target_from_hex("ffffffffff"), Err(Error::Malformed(_))));
        assert!(matches!(target_from_hex("0"), Err(Error::InvalidHex(_))));
    }

    proptest! {
        #[test]
        fn prop_hex_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let text = bin_to_hex(&bytes);
            prop_assert_eq!(text.len(), bytes.len() * 2);
            prop_assert!(text.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            prop_assert_eq!(hex_to_bin(&text).unwrap(), bytes);
        }

        #[test]
        fn prop_hex_fails_iff_invalid_char(
            chars in prop::collection::vec(
                prop_oneof![
                    prop::sample::select("0123456789abcdefABCDEF".chars().collect::<Vec<_>>()),
                    prop::sample::select("ghxyzGXZ-_ .:".chars().collect::<Vec<_>>()),
                ],
                0..32,
            ).prop_map(|mut v| { if v.len() % 2 == 1 { v.pop(); } v })
        ) {
            let text: String = chars.iter().collect();
            let all_hex = text.chars().all(|c| c.is_ascii_hexdigit());
            prop_assert_eq!(hex_to_bin(&text).is_ok(), all_hex);
        }
    }
}
