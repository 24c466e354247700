//! Canonical MAC address formatting, grounded on the `format_mac` helper of
//! the bridge this crate replaces.

use thiserror::Error;

pub const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";

/// Destination prefixes that are always fanned out, even to peers that
/// haven't claimed the address. IANA-assigned multicast/link-local ranges.
pub const MULTICAST_PREFIXES: &[&str] = &["33:33:", "01:00:5e:", "00:52:02:"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacError {
    #[error("MAC address must be 6 bytes, got {0}")]
    WrongLength(usize),
    #[error("invalid MAC text form: {0}")]
    InvalidText(String),
}

/// Render 6 raw bytes as lowercase colon-separated hex.
pub fn format_mac(bytes: &[u8]) -> Result<String, MacError> {
    if bytes.len() != 6 {
        return Err(MacError::WrongLength(bytes.len()));
    }
    Ok(bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Parse a canonical `xx:xx:xx:xx:xx:xx` string back into 6 bytes.
pub fn parse_mac(text: &str) -> Result<[u8; 6], MacError> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 6 {
        return Err(MacError::InvalidText(text.to_string()));
    }
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16).map_err(|_| MacError::InvalidText(text.to_string()))?;
    }
    Ok(out)
}

/// True iff `mac` begins with one of the whitelisted multicast prefixes.
pub fn is_whitelisted_multicast(mac: &str) -> bool {
    MULTICAST_PREFIXES.iter().any(|p| mac.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lowercase_colon_hex() {
        let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        assert_eq!(format_mac(&mac).unwrap(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(format_mac(&[1, 2, 3]), Err(MacError::WrongLength(3)));
    }

    #[test]
    fn round_trips() {
        let mac = [0x00, 0x52, 0x02, 0x11, 0x22, 0x33];
        let text = format_mac(&mac).unwrap();
        let text2 = format_mac(&parse_mac(&text).unwrap()).unwrap();
        assert_eq!(text, text2);
    }

    #[test]
    fn recognizes_multicast_prefixes() {
        assert!(is_whitelisted_multicast("33:33:00:00:00:01"));
        assert!(is_whitelisted_multicast("01:00:5e:00:00:fb"));
        assert!(is_whitelisted_multicast("00:52:02:aa:bb:cc"));
        assert!(!is_whitelisted_multicast("aa:bb:cc:dd:ee:ff"));
    }
}
