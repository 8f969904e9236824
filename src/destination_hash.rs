//! Parsing helpers for hex-encoded destination hashes, as typically supplied
//! on a command line or in a config file.

#[cfg(not(feature = "std"))]
use crate::error::RnsError;

pub fn parse_destination_hash(input: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(input.trim()).ok()?;
    let mut out = [0u8; 16];
    match bytes.len() {
        16 => {
            out.copy_from_slice(&bytes);
            Some(out)
        }
        32 => {
            out.copy_from_slice(&bytes[..16]);
            Some(out)
        }
        _ => None,
    }
}

#[cfg(feature = "std")]
pub fn parse_destination_hash_required(input: &str) -> Result<[u8; 16], std::io::Error> {
    parse_destination_hash(input).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            alloc::format!("invalid destination hash '{input}' (expected 16-byte or 32-byte hex)"),
        )
    })
}

#[cfg(not(feature = "std"))]
pub fn parse_destination_hash_required(input: &str) -> Result<[u8; 16], RnsError> {
    parse_destination_hash(input).ok_or(RnsError::InvalidArgument)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sixteen_byte_hex() {
        let hex_str = "00112233445566778899aabbccddeeff".get(0..32).unwrap();
        assert_eq!(parse_destination_hash(hex_str).unwrap().len(), 16);
    }

    #[test]
    fn truncates_thirty_two_byte_hex_to_sixteen() {
        let hex_str = "0".repeat(64);
        assert!(parse_destination_hash(&hex_str).is_some());
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(parse_destination_hash("not-hex").is_none());
    }
}
