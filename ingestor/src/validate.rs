use crate::errors::{Error, Result};
use crate::model::SigfoxCallback;

const DEVICE_ID_MAX_LEN: usize = 64;

/// Validates the envelope-level fields of a backend callback.
///
/// The payload itself is not checked here: malformed payloads still produce
/// an archived entry carrying a decode error.
pub fn validate(callback: &SigfoxCallback) -> Result<()> {
    let device_id = callback.device.trim();

    if device_id.is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }

    if device_id.len() > DEVICE_ID_MAX_LEN {
        return Err(Error::Validation(format!(
            "Device ID longer than {} characters",
            DEVICE_ID_MAX_LEN
        )));
    }

    if device_id.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "Device ID {:?} contains whitespace",
            device_id
        )));
    }

    if let Some(seq) = callback.seq_number {
        if seq < 0 {
            return Err(Error::Validation(format!(
                "Sequence number {} is negative",
                seq
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(device: &str) -> SigfoxCallback {
        SigfoxCallback {
            device: device.to_string(),
            data: "0001".to_string(),
            time: None,
            seq_number: Some(1),
            device_type_id: None,
        }
    }

    #[test]
    fn test_valid_callback() {
        assert!(validate(&callback("1FC5622")).is_ok());
    }

    #[test]
    fn test_malformed_payload_still_valid() {
        let mut cb = callback("c52fce");
        cb.data = "not hex".to_string();
        assert!(validate(&cb).is_ok());
    }

    #[test]
    fn test_empty_device_id() {
        assert!(validate(&callback("")).is_err());
        assert!(validate(&callback("   ")).is_err());
    }

    #[test]
    fn test_device_id_with_whitespace() {
        assert!(validate(&callback("1fc 5622")).is_err());
    }

    #[test]
    fn test_device_id_too_long() {
        assert!(validate(&callback(&"a".repeat(65))).is_err());
    }

    #[test]
    fn test_negative_sequence() {
        let mut cb = callback("1fc5622");
        cb.seq_number = Some(-3);
        assert!(validate(&cb).is_err());
    }
}
