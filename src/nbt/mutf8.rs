//! Java-style modified UTF-8, the string encoding used inside tagged trees.
//!
//! It differs from UTF-8 in two places: `U+0000` is written as the two bytes `C0 80`, and characters outside the
//! basic multilingual plane are written as a surrogate pair of three-byte sequences. Everything else is plain UTF-8,
//! so the common case borrows the input untouched.

use std::borrow::Cow;

/// Encodes `s` as modified UTF-8.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(s: &str) -> Cow<'_, [u8]> {
    if s.chars().all(|c| c != '\0' && u32::from(c) < 0x1_0000) {
        return Cow::Borrowed(s.as_bytes());
    }

    let mut out = Vec::with_capacity(s.len() + 8);
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Cow::Owned(out)
}

/// Decodes modified UTF-8, returning `None` on malformed input or unpaired surrogates.
pub fn decode(bytes: &[u8]) -> Option<String> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Some(s.to_string());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let first = bytes[i];
        match first >> 4 {
            0..=7 => {
                units.push(u16::from(first));
                i += 1;
            }
            12 | 13 => {
                let second = continuation(bytes, i + 1)?;
                units.push((u16::from(first & 0x1F) << 6) | second);
                i += 2;
            }
            14 => {
                let second = continuation(bytes, i + 1)?;
                let third = continuation(bytes, i + 2)?;
                units.push((u16::from(first & 0x0F) << 12) | (second << 6) | third);
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

fn continuation(bytes: &[u8], index: usize) -> Option<u16> {
    let byte = *bytes.get(index)?;
    (byte & 0xC0 == 0x80).then_some(u16::from(byte & 0x3F))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_borrowed() {
        assert!(matches!(encode("Data"), Cow::Borrowed(b"Data")));
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b").as_ref(), &[b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).as_deref(), Some("a\0b"));
    }

    #[test]
    fn supplementary_characters_use_surrogate_pairs() {
        let encoded = encode("🪑");
        assert_eq!(encoded.as_ref(), &[0xED, 0xA0, 0xBE, 0xED, 0xBA, 0x91]);
        assert_eq!(decode(&encoded).as_deref(), Some("🪑"));
    }

    #[test]
    fn rejects_truncated_sequences() {
        assert_eq!(decode(&[0xE2, 0x82]), None);
        assert_eq!(decode(&[0xC0]), None);
    }
}
