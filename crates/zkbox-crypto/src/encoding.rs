//! Byte/text conversions shared by every client implementation.
//!
//! Wire fields use the standard base64 alphabet with padding; share
//! fragments use the URL-safe alphabet without padding so they survive in a
//! URL fragment untouched. Both must round-trip bit-for-bit with the web
//! client's `btoa`/`atob` output.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use zkbox_core::{ZkError, ZkResult};

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_base64(field: &str, s: &str) -> ZkResult<Vec<u8>> {
    STANDARD
        .decode(s.trim())
        .map_err(|e| ZkError::protocol(format!("{field}: invalid base64: {e}")))
}

pub fn encode_base64_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode_base64_url(field: &str, s: &str) -> ZkResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ZkError::protocol(format!("{field}: invalid base64url: {e}")))
}

/// Decode standard base64 and require exactly `N` bytes.
pub fn decode_base64_fixed<const N: usize>(field: &str, s: &str) -> ZkResult<[u8; N]> {
    to_fixed(field, decode_base64(field, s)?)
}

/// Decode URL-safe base64 and require exactly `N` bytes.
pub fn decode_base64_url_fixed<const N: usize>(field: &str, s: &str) -> ZkResult<[u8; N]> {
    to_fixed(field, decode_base64_url(field, s)?)
}

fn to_fixed<const N: usize>(field: &str, bytes: Vec<u8>) -> ZkResult<[u8; N]> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ZkError::protocol(format!("{field}: expected {N} bytes, got {len}")))
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

pub fn decode_hex(field: &str, s: &str) -> ZkResult<Vec<u8>> {
    hex::decode(s.trim()).map_err(|e| ZkError::InvalidInput(format!("{field}: invalid hex: {e}")))
}

pub fn utf8_decode(bytes: Vec<u8>) -> ZkResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| ZkError::protocol(format!("decrypted name is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_matches_rfc4648() {
        // RFC 4648 section 10 vectors
        assert_eq!(encode_base64(b""), "");
        assert_eq!(encode_base64(b"f"), "Zg==");
        assert_eq!(encode_base64(b"fo"), "Zm8=");
        assert_eq!(encode_base64(b"foobar"), "Zm9vYmFy");
        assert_eq!(decode_base64("x", "Zm9vYg==").unwrap(), b"foob");
    }

    #[test]
    fn test_base64_url_has_no_padding_or_plus() {
        let data = [0xfbu8, 0xff, 0xfe, 0x01];
        let std = encode_base64(&data);
        let url = encode_base64_url(&data);
        assert!(std.contains('+') || std.contains('/') || std.contains('='));
        assert!(!url.contains('+') && !url.contains('/') && !url.contains('='));
        assert_eq!(decode_base64_url("x", &url).unwrap(), data);
    }

    #[test]
    fn test_fixed_length_enforced() {
        let twelve = encode_base64(&[7u8; 12]);
        assert_eq!(decode_base64_fixed::<12>("cipherIv", &twelve).unwrap(), [7u8; 12]);

        let err = decode_base64_fixed::<48>("edek", &twelve).unwrap_err();
        assert!(matches!(err, ZkError::ProtocolViolation(_)));
        assert!(err.to_string().contains("edek: expected 48 bytes, got 12"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(matches!(
            decode_base64("edekIv", "not*base64"),
            Err(ZkError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = [0x00u8, 0xab, 0xff];
        assert_eq!(encode_hex(&bytes), "00abff");
        assert_eq!(decode_hex("salt", "00ABff").unwrap(), bytes);
        assert!(decode_hex("salt", "abc").is_err());
    }

    #[test]
    fn test_utf8_decode() {
        assert_eq!(utf8_decode("résumé.pdf".as_bytes().to_vec()).unwrap(), "résumé.pdf");
        assert!(matches!(
            utf8_decode(vec![0xff, 0xfe]),
            Err(ZkError::ProtocolViolation(_))
        ));
    }
}
