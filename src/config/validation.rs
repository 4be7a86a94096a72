//! Configuration validation helpers

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, ZeroWireError};

/// Validate that a configured key decodes to exactly 32 raw bytes.
pub fn validate_key32(iface: &str, field: &str, value: &str) -> Result<()> {
    let decoded = BASE64.decode(value).map_err(|e| {
        ZeroWireError::Config(format!("{}: {} is not valid base64: {}", iface, field, e))
    })?;
    if decoded.len() != 32 {
        return Err(ZeroWireError::Config(format!(
            "{}: {} must decode to 32 bytes, got {}",
            iface,
            field,
            decoded.len()
        )));
    }
    Ok(())
}

/// Normalize a DNS-SD service type label.
///
/// Bare labels expand to a TCP service type (`rar` becomes
/// `_rar._tcp.`); fully spelled types keep their protocol but always
/// carry a trailing dot.
pub fn normalize_service_type(label: &str) -> String {
    let label = label.trim();
    let mut normalized = if label.starts_with('_') {
        label.to_string()
    } else {
        format!("_{}._tcp", label.trim_end_matches('.'))
    };
    if !normalized.ends_with('.') {
        normalized.push('.');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_label() {
        assert_eq!(normalize_service_type("rar"), "_rar._tcp.");
        assert_eq!(normalize_service_type("rar."), "_rar._tcp.");
    }

    #[test]
    fn test_normalize_full_type() {
        assert_eq!(normalize_service_type("_rar._tcp"), "_rar._tcp.");
        assert_eq!(normalize_service_type("_rar._tcp."), "_rar._tcp.");
        assert_eq!(normalize_service_type("_sync._udp."), "_sync._udp.");
    }

    #[test]
    fn test_validate_key32() {
        assert!(validate_key32(
            "wg-test",
            "psk",
            "1j75n1Zcwp9tUMuFH5H6C5Jn0PVjk66UXqSbY/OTjb8="
        )
        .is_ok());
        assert!(validate_key32("wg-test", "psk", "c2hvcnQ=").is_err());
        assert!(validate_key32("wg-test", "psk", "not base64!!").is_err());
    }
}
