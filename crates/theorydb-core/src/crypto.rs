//! Encrypted-field envelopes.
//!
//! An encrypted field is stored as the map `{v, edk, nonce, ct}`: a format
//! version, the wrapped data key, the nonce, and the authenticated
//! ciphertext. The provider trait owns sealing and opening; the core only
//! builds and parses the envelope and fails closed when no provider is
//! configured.

use std::collections::HashMap;

use crate::error::ConvertError;
use crate::value::Av;

/// Current envelope format version.
pub const ENVELOPE_VERSION: i64 = 1;

/// A sealed value as stored on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Envelope format version.
    pub version: i64,
    /// The data key, wrapped by the provider's key-management system.
    pub encrypted_data_key: Vec<u8>,
    /// Nonce used for the ciphertext.
    pub nonce: Vec<u8>,
    /// Authenticated ciphertext of the field's serialized value.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Renders the envelope as its wire map.
    pub fn to_av(&self) -> Av {
        Av::M(HashMap::from([
            ("v".to_string(), Av::n(self.version)),
            ("edk".to_string(), Av::B(self.encrypted_data_key.clone())),
            ("nonce".to_string(), Av::B(self.nonce.clone())),
            ("ct".to_string(), Av::B(self.ciphertext.clone())),
        ]))
    }

    /// Parses an envelope from its wire map, validating the exact shape.
    pub fn from_av(av: &Av) -> Result<Self, ConvertError> {
        let Av::M(map) = av else {
            return Err(ConvertError::InvalidEncryptedEnvelope {
                reason: "envelope is not a map",
            });
        };
        if map.len() != 4 {
            return Err(ConvertError::InvalidEncryptedEnvelope {
                reason: "envelope must have exactly v, edk, nonce, ct",
            });
        }
        let version = match map.get("v") {
            Some(Av::N(n)) => n.parse::<i64>().map_err(|_| ConvertError::InvalidEncryptedEnvelope {
                reason: "version is not an integer",
            })?,
            _ => {
                return Err(ConvertError::InvalidEncryptedEnvelope {
                    reason: "missing or non-numeric version",
                });
            }
        };
        let bytes = |key: &str, reason: &'static str| -> Result<Vec<u8>, ConvertError> {
            match map.get(key) {
                Some(Av::B(b)) => Ok(b.clone()),
                _ => Err(ConvertError::InvalidEncryptedEnvelope { reason }),
            }
        };
        Ok(Self {
            version,
            encrypted_data_key: bytes("edk", "missing or non-binary edk")?,
            nonce: bytes("nonce", "missing or non-binary nonce")?,
            ciphertext: bytes("ct", "missing or non-binary ct")?,
        })
    }
}

/// Seals and opens field values through an external key-management system.
///
/// Implementations perform the actual cryptography; the core never handles
/// raw key material.
pub trait DataKeyProvider: Send + Sync {
    /// Encrypts a serialized field value into an envelope.
    fn seal(&self, plaintext: &[u8]) -> Result<Envelope, ConvertError>;

    /// Decrypts an envelope back to the serialized field value.
    fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, ConvertError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Envelope {
        Envelope {
            version: ENVELOPE_VERSION,
            encrypted_data_key: vec![1, 2],
            nonce: vec![3, 4],
            ciphertext: vec![5, 6, 7],
        }
    }

    #[test]
    fn envelope_av_roundtrip() {
        let env = sample();
        let back = Envelope::from_av(&env.to_av()).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(Envelope::from_av(&Av::s("nope")).is_err());
        assert!(Envelope::from_av(&Av::M(HashMap::new())).is_err());

        // Extra key.
        let mut av = sample().to_av();
        if let Av::M(m) = &mut av {
            m.insert("extra".into(), Av::Null);
        }
        assert!(matches!(
            Envelope::from_av(&av),
            Err(ConvertError::InvalidEncryptedEnvelope { .. })
        ));

        // Wrong type for ct.
        let mut av = sample().to_av();
        if let Av::M(m) = &mut av {
            m.insert("ct".into(), Av::s("text"));
        }
        assert!(Envelope::from_av(&av).is_err());

        // Non-numeric version.
        let mut av = sample().to_av();
        if let Av::M(m) = &mut av {
            m.insert("v".into(), Av::s("one"));
        }
        assert!(Envelope::from_av(&av).is_err());
    }
}
