//! # Integrity Hasher
//!
//! Deterministic SHA-256 fingerprint of a serial number, used to detect silent
//! corruption and mismatched manual edits. Not a secrecy mechanism: the
//! plaintext serial is stored and displayed alongside it.

use super::errors::{CustodyError, ValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag mixed into every fingerprint.
const FINGERPRINT_DOMAIN: &[u8] = b"custody-serial-v1:";

/// Fixed-length serial fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}..)", &self.to_hex()[..12])
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(&value).map_err(|e| format!("invalid fingerprint hex: {e}"))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "fingerprint must be 32 bytes".to_string())?;
        Ok(Self(digest))
    }
}

/// Computes and checks serial fingerprints.
pub struct IntegrityHasher;

impl IntegrityHasher {
    /// Fingerprint a serial.
    ///
    /// Surrounding whitespace is ignored; the serial is otherwise hashed as
    /// given, so case folding must happen before this call.
    pub fn fingerprint(serial: &str) -> Result<Fingerprint, CustodyError> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(ValidationError::EmptySerial.into());
        }
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(serial.as_bytes());
        Ok(Fingerprint(hasher.finalize().into()))
    }

    /// Check a stored fingerprint against the serial it claims to cover.
    pub fn verify(serial: &str, stored: &Fingerprint) -> Result<(), CustodyError> {
        let computed = match Self::fingerprint(serial) {
            Ok(fp) => fp,
            // An empty stored serial can never have produced a fingerprint.
            Err(_) => Fingerprint([0u8; 32]),
        };
        if computed != *stored {
            return Err(CustodyError::IntegrityMismatch {
                serial: serial.to_string(),
                stored: *stored,
                computed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = IntegrityHasher::fingerprint("WD-123456").unwrap();
        let b = IntegrityHasher::fingerprint("WD-123456").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_surrounding_whitespace() {
        let a = IntegrityHasher::fingerprint("  WD-123456\t").unwrap();
        let b = IntegrityHasher::fingerprint("WD-123456").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_serials() {
        let a = IntegrityHasher::fingerprint("WD-123456").unwrap();
        let b = IntegrityHasher::fingerprint("WD-123457").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_rejects_empty() {
        assert_eq!(
            IntegrityHasher::fingerprint("   "),
            Err(CustodyError::Validation(ValidationError::EmptySerial))
        );
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let stored = IntegrityHasher::fingerprint("WD-1").unwrap();
        assert!(IntegrityHasher::verify("WD-1", &stored).is_ok());
        let err = IntegrityHasher::verify("WD-2", &stored).unwrap_err();
        assert!(matches!(err, CustodyError::IntegrityMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fingerprint_serde_hex() {
        let fp = IntegrityHasher::fingerprint("ST-9").unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<Fingerprint>("\"abcd\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_fingerprint_verifies_own_serial(serial in "[A-Za-z0-9-]{1,40}") {
            let fp = IntegrityHasher::fingerprint(&serial).unwrap();
            prop_assert!(IntegrityHasher::verify(&serial, &fp).is_ok());
            prop_assert_eq!(fp, IntegrityHasher::fingerprint(&serial).unwrap());
        }
    }
}
