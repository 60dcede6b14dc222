//! Text encoding of encrypted secrets.
//!
//! Current envelopes carry four colon-separated lowercase hex fields:
//! `<salt>:<iv>:<tag>:<ciphertext>`. Records written by the old fixed-key
//! scheme carry three: `<iv>:<tag>:<ciphertext>`. The layout is the version
//! tag; any other field count is rejected.

use std::fmt;

use super::{CryptoError, NONCE_LEN, SALT_LEN, TAG_LEN};

/// Envelope format version, derived from the field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeVersion {
    /// `iv:tag:ciphertext`, key used directly without a salt. Decrypt only.
    V1Legacy,
    /// `salt:iv:tag:ciphertext`, key derived per envelope with Argon2id.
    V2Salted,
}

/// A parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Legacy {
        nonce: Vec<u8>,
        tag: [u8; TAG_LEN],
        ciphertext: Vec<u8>,
    },
    Salted {
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
        tag: [u8; TAG_LEN],
        ciphertext: Vec<u8>,
    },
}

impl Envelope {
    /// Parse an envelope string, failing on any layout, encoding or length error.
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let fields: Vec<&str> = encoded.split(':').collect();
        match fields.as_slice() {
            [salt, nonce, tag, ciphertext] => Ok(Envelope::Salted {
                salt: fixed::<SALT_LEN>("salt", salt)?,
                nonce: fixed::<NONCE_LEN>("iv", nonce)?,
                tag: fixed::<TAG_LEN>("auth tag", tag)?,
                ciphertext: decode_field("ciphertext", ciphertext)?,
            }),
            [nonce, tag, ciphertext] => {
                let nonce = decode_field("iv", nonce)?;
                if nonce.is_empty() {
                    return Err(CryptoError::MalformedEnvelope(
                        "iv field is empty".to_string(),
                    ));
                }
                Ok(Envelope::Legacy {
                    nonce,
                    tag: fixed::<TAG_LEN>("auth tag", tag)?,
                    ciphertext: decode_field("ciphertext", ciphertext)?,
                })
            }
            _ => Err(CryptoError::MalformedEnvelope(format!(
                "expected 4 fields, found {}",
                fields.len()
            ))),
        }
    }

    pub fn version(&self) -> EnvelopeVersion {
        match self {
            Envelope::Legacy { .. } => EnvelopeVersion::V1Legacy,
            Envelope::Salted { .. } => EnvelopeVersion::V2Salted,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Legacy {
                nonce,
                tag,
                ciphertext,
            } => write!(
                f,
                "{}:{}:{}",
                hex::encode(nonce),
                hex::encode(tag),
                hex::encode(ciphertext)
            ),
            Envelope::Salted {
                salt,
                nonce,
                tag,
                ciphertext,
            } => write!(
                f,
                "{}:{}:{}:{}",
                hex::encode(salt),
                hex::encode(nonce),
                hex::encode(tag),
                hex::encode(ciphertext)
            ),
        }
    }
}

/// Decode one field. Only lowercase hex is accepted so that every encoded
/// byte is significant.
fn decode_field(name: &str, field: &str) -> Result<Vec<u8>, CryptoError> {
    if !field
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(CryptoError::MalformedEnvelope(format!(
            "{name} field is not lowercase hex"
        )));
    }
    hex::decode(field)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("{name} field: {e}")))
}

fn fixed<const N: usize>(name: &str, field: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode_field(name, field)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::MalformedEnvelope(format!(
            "{name} field has {} bytes, expected {N}",
            b.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salted_sample() -> String {
        format!(
            "{}:{}:{}:{}",
            "11".repeat(SALT_LEN),
            "22".repeat(NONCE_LEN),
            "33".repeat(TAG_LEN),
            "deadbeef"
        )
    }

    #[test]
    fn parses_salted_layout() {
        let env = Envelope::parse(&salted_sample()).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::V2Salted);
        match &env {
            Envelope::Salted {
                salt, ciphertext, ..
            } => {
                assert_eq!(salt, &[0x11; SALT_LEN]);
                assert_eq!(ciphertext, &vec![0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        assert_eq!(env.to_string(), salted_sample());
    }

    #[test]
    fn parses_legacy_layout_with_sixteen_byte_iv() {
        let encoded = format!("{}:{}:{}", "ab".repeat(16), "cd".repeat(TAG_LEN), "00ff");
        let env = Envelope::parse(&encoded).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::V1Legacy);
        assert_eq!(env.to_string(), encoded);
    }

    #[test]
    fn empty_ciphertext_is_allowed() {
        let encoded = format!(
            "{}:{}:{}:",
            "11".repeat(SALT_LEN),
            "22".repeat(NONCE_LEN),
            "33".repeat(TAG_LEN)
        );
        assert!(Envelope::parse(&encoded).is_ok());
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        for encoded in ["", "aa", "aa:bb", "aa:bb:cc:dd:ee"] {
            assert!(
                matches!(
                    Envelope::parse(encoded),
                    Err(CryptoError::MalformedEnvelope(_))
                ),
                "should reject {:?}",
                encoded
            );
        }
    }

    #[test]
    fn short_salt_is_rejected() {
        let encoded = format!(
            "{}:{}:{}:00",
            "11".repeat(SALT_LEN - 1),
            "22".repeat(NONCE_LEN),
            "33".repeat(TAG_LEN)
        );
        let err = Envelope::parse(&encoded).unwrap_err();
        assert!(err.to_string().contains("salt"), "{}", err);
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let encoded = salted_sample().replace("deadbeef", "DEADBEEF");
        assert!(Envelope::parse(&encoded).is_err());
    }

    #[test]
    fn odd_length_hex_is_rejected() {
        let encoded = salted_sample().replace("deadbeef", "deadbee");
        assert!(Envelope::parse(&encoded).is_err());
    }
}
