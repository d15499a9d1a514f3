//! MAC address canonicalization.
//!
//! Every other component that touches a MAC address goes through
//! [`normalize`] first; everything downstream assumes canonical form
//! (`aa:bb:cc:dd:ee:ff`, lowercase, colon-separated).

use thiserror::Error;

/// Errors returned when a MAC address or OID suffix cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacError {
    /// The input did not reduce to exactly 12 hex digits.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// An SNMP OID suffix did not decode to six decimal octets.
    #[error("invalid OID suffix: {0}")]
    InvalidOidSuffix(String),
}

/// Canonicalizes a MAC address string.
///
/// Accepts colon-, dash-, and dot-separated forms (Cisco-style
/// `aabb.ccdd.eeff`) as well as bare hex, case-insensitively, with
/// surrounding whitespace stripped. An empty input is the "absent MAC"
/// sentinel and returns `Ok("")` rather than an error.
pub fn normalize(mac: &str) -> Result<String, MacError> {
    let trimmed = mac.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if cleaned.len() != 12 || !cleaned.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(MacError::InvalidMac(mac.to_string()));
    }

    let lower = cleaned.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}

/// Converts a canonical MAC address to its SNMP OID suffix
/// (six dot-separated decimal octets).
pub fn mac_to_oid_suffix(mac: &str) -> Result<String, MacError> {
    let canonical = normalize(mac)?;
    if canonical.is_empty() {
        return Err(MacError::InvalidMac(mac.to_string()));
    }

    let parts: Result<Vec<String>, MacError> = canonical
        .split(':')
        .map(|octet| {
            u8::from_str_radix(octet, 16)
                .map(|v| v.to_string())
                .map_err(|_| MacError::InvalidMac(mac.to_string()))
        })
        .collect();

    Ok(parts?.join("."))
}

/// Converts an SNMP OID suffix (six dot-separated decimal octets) back to
/// a canonical MAC address. Inverse of [`mac_to_oid_suffix`].
pub fn oid_suffix_to_mac(oid_suffix: &str) -> Result<String, MacError> {
    let parts: Vec<&str> = oid_suffix.split('.').collect();
    if parts.len() != 6 {
        return Err(MacError::InvalidOidSuffix(oid_suffix.to_string()));
    }

    let octets: Result<Vec<String>, MacError> = parts
        .iter()
        .map(|p| {
            p.parse::<u8>()
                .map(|v| format!("{v:02x}"))
                .map_err(|_| MacError::InvalidOidSuffix(oid_suffix.to_string()))
        })
        .collect();

    Ok(octets?.join(":"))
}
