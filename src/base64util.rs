//! Lenient base64 decoding for `<publish>` bodies.
//!
//! RRDP publishers commonly wrap the base64 body across multiple lines;
//! per spec §4.4 and §9 ("Base64 leniency") we strip every byte outside
//! the base64 alphabet (`[A-Za-z0-9+/=]`) before handing the rest to the
//! decoder, the same way `rrdpit::rrdp::Snapshot::from_xml` defers to
//! `base64::engine::general_purpose::STANDARD` for the inverse
//! (encoding) direction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Strips non-alphabet bytes and decodes. An empty `data` (after
/// stripping) decodes to an empty `Vec`, which callers must reject for
/// every record type except `WITHDRAW` (spec §4.4).
pub fn lenient_decode(data: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let filtered: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    STANDARD.decode(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whitespace_and_newlines() {
        let input = b"aGVs\n  bG8g\td29ybGQ=\n";
        let decoded = lenient_decode(input).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn empty_input_decodes_to_empty() {
        assert_eq!(lenient_decode(b"\n  \n").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_truncated_data() {
        assert!(lenient_decode(b"a").is_err());
    }
}
