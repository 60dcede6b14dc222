//! AES-256-GCM encryption of stored secrets.
//!
//! Every [`Cipher::encrypt`] call draws a fresh salt and IV from the system
//! CSPRNG and derives a new key with Argon2id, so equal plaintexts never
//! produce equal envelopes. [`Cipher::decrypt`] fails closed: a malformed
//! envelope or a tag mismatch is an error, never an empty or partial string.

pub mod envelope;
pub mod kdf;

use std::sync::Arc;

use aes_gcm::aead::{consts::U16, AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce as GcmNonce, Tag as GcmTag};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

pub use envelope::{Envelope, EnvelopeVersion};
pub use kdf::KdfParams;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// IV length the fixed-key scheme wrote.
pub const LEGACY_NONCE_LEN: usize = 16;

/// AES-256-GCM with a 16-byte IV, which ring does not offer.
type LegacyAesGcm = AesGcm<Aes256, U16>;

/// Failures of the crypto engine. Messages never contain key or plaintext material.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("master secret is not configured")]
    MissingMasterSecret,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("authentication tag verification failed")]
    Authentication,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("legacy envelope found but no legacy key is configured")]
    LegacyKeyUnavailable,

    #[error("legacy envelope uses a {0}-byte IV, only 12 or 16-byte IVs can be opened")]
    UnsupportedNonce(usize),

    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,

    #[error("system random number generator failed")]
    Rng,

    #[error("AES-256-GCM encryption failed")]
    Seal,
}

struct CipherInner {
    master: SecretString,
    legacy_key: Option<Zeroizing<[u8; KEY_LEN]>>,
    kdf: KdfParams,
    rng: SystemRandom,
}

/// Encrypts and decrypts secrets under the process-wide master secret.
///
/// Cheap to clone; clones share the same key material.
#[derive(Clone)]
pub struct Cipher {
    inner: Arc<CipherInner>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("master", &"[REDACTED]")
            .field("legacy_key", &self.inner.legacy_key.as_ref().map(|_| "[REDACTED]"))
            .field("kdf", &self.inner.kdf)
            .finish()
    }
}

impl Cipher {
    /// Build a cipher. Refuses an empty master secret.
    pub fn new(master: SecretString, kdf: KdfParams) -> Result<Self, CryptoError> {
        Self::build(master, kdf, None)
    }

    /// Build a cipher that can also open v1 (fixed-key) envelopes.
    pub fn with_legacy_key(
        master: SecretString,
        kdf: KdfParams,
        legacy_key: [u8; KEY_LEN],
    ) -> Result<Self, CryptoError> {
        Self::build(master, kdf, Some(Zeroizing::new(legacy_key)))
    }

    fn build(
        master: SecretString,
        kdf: KdfParams,
        legacy_key: Option<Zeroizing<[u8; KEY_LEN]>>,
    ) -> Result<Self, CryptoError> {
        if master.expose_secret().is_empty() {
            return Err(CryptoError::MissingMasterSecret);
        }
        kdf.validate()?;
        Ok(Self {
            inner: Arc::new(CipherInner {
                master,
                legacy_key,
                kdf,
                rng: SystemRandom::new(),
            }),
        })
    }

    /// Encrypt `plaintext` into a v2 envelope string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let salt = kdf::generate_salt()?;
        let mut nonce = [0u8; NONCE_LEN];
        self.inner
            .rng
            .fill(&mut nonce)
            .map_err(|_| CryptoError::Rng)?;

        let key = kdf::derive_key(
            self.inner.master.expose_secret().as_bytes(),
            &salt,
            self.inner.kdf,
        )?;
        let sealing = aes_key(&key)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Seal)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_ref());

        Ok(Envelope::Salted {
            salt,
            nonce,
            tag: tag_bytes,
            ciphertext: in_out,
        }
        .to_string())
    }

    /// Decrypt an envelope string, dispatching on its version.
    pub fn decrypt(&self, encoded: &str) -> Result<SecretString, CryptoError> {
        let envelope = Envelope::parse(encoded)?;
        if envelope.version() == EnvelopeVersion::V1Legacy {
            tracing::debug!("Opening legacy fixed-key envelope");
        }
        let plaintext = match envelope {
            Envelope::Salted {
                salt,
                nonce,
                tag,
                ciphertext,
            } => {
                let key = kdf::derive_key(
                    self.inner.master.expose_secret().as_bytes(),
                    &salt,
                    self.inner.kdf,
                )?;
                open(&key, &nonce, &tag, ciphertext)?
            }
            Envelope::Legacy {
                nonce,
                tag,
                ciphertext,
            } => {
                let key = self
                    .inner
                    .legacy_key
                    .as_ref()
                    .ok_or(CryptoError::LegacyKeyUnavailable)?;
                match nonce.len() {
                    NONCE_LEN => open(key, &nonce, &tag, ciphertext)?,
                    LEGACY_NONCE_LEN => open_legacy(key, &nonce, &tag, ciphertext)?,
                    other => return Err(CryptoError::UnsupportedNonce(other)),
                }
            }
        };

        String::from_utf8(plaintext.to_vec())
            .map(SecretString::from)
            .map_err(|_| CryptoError::InvalidUtf8)
    }
}

fn aes_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, CryptoError> {
    UnboundKey::new(&AES_256_GCM, key)
        .map(LessSafeKey::new)
        .map_err(|_| CryptoError::KeyDerivation("failed to create AES-256-GCM key".to_string()))
}

fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    tag: &[u8; TAG_LEN],
    ciphertext: Vec<u8>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce = Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| CryptoError::UnsupportedNonce(nonce.len()))?;
    let opening = aes_key(key)?;

    let mut in_out = Zeroizing::new(ciphertext);
    in_out.extend_from_slice(tag);
    let len = opening
        .open_in_place(nonce, Aad::empty(), in_out.as_mut_slice())
        .map_err(|_| CryptoError::Authentication)?
        .len();
    in_out.truncate(len);
    Ok(in_out)
}

/// Open a 16-byte-IV envelope from the fixed-key scheme.
fn open_legacy(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    tag: &[u8; TAG_LEN],
    ciphertext: Vec<u8>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != LEGACY_NONCE_LEN {
        return Err(CryptoError::UnsupportedNonce(nonce.len()));
    }
    let cipher = LegacyAesGcm::new_from_slice(key)
        .map_err(|_| CryptoError::KeyDerivation("failed to create AES-256-GCM key".to_string()))?;

    let mut buffer = Zeroizing::new(ciphertext);
    cipher
        .decrypt_in_place_detached(
            GcmNonce::<U16>::from_slice(nonce),
            b"",
            buffer.as_mut_slice(),
            GcmTag::<U16>::from_slice(tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(buffer)
}

/// Decode a hex-encoded 32-byte key (the legacy fixed-key format).
pub fn parse_hex_key(encoded: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = Zeroizing::new(
        hex::decode(encoded.trim())
            .map_err(|e| CryptoError::KeyDerivation(format!("key is not valid hex: {e}")))?,
    );
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::KeyDerivation(format!(
            "key must be {KEY_LEN} bytes, found {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn cipher() -> Cipher {
        Cipher::new(SecretString::from("correct horse battery staple".to_string()), cheap()).unwrap()
    }

    /// Produce a v1 envelope the way the fixed-key scheme wrote them.
    fn legacy_seal(key: &[u8; KEY_LEN], nonce: [u8; NONCE_LEN], plaintext: &str) -> String {
        let sealing = aes_key(key).unwrap();
        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut in_out,
            )
            .unwrap();
        format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag.as_ref()),
            hex::encode(&in_out)
        )
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        for plaintext in ["sk-abc", "", "ünïcødé 🔑", &"x".repeat(4096)] {
            let envelope = c.encrypt(plaintext).unwrap();
            assert_eq!(c.decrypt(&envelope).unwrap().expose_secret(), plaintext);
        }
    }

    #[test]
    fn envelope_has_four_hex_fields() {
        let envelope = cipher().encrypt("sk-abc").unwrap();
        let fields: Vec<&str> = envelope.split(':').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].len(), SALT_LEN * 2);
        assert_eq!(fields[1].len(), NONCE_LEN * 2);
        assert_eq!(fields[2].len(), TAG_LEN * 2);
        assert_eq!(fields[3].len(), "sk-abc".len() * 2);
        assert!(!envelope.contains("sk-abc"));
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let c = cipher();
        let a = c.encrypt("same input").unwrap();
        let b = c.encrypt("same input").unwrap();
        assert_ne!(a, b);

        let salt_a = a.split(':').next().unwrap();
        let salt_b = b.split(':').next().unwrap();
        assert_ne!(salt_a, salt_b);
    }

    #[test]
    fn any_single_byte_change_fails_closed() {
        let c = cipher();
        let envelope = c.encrypt("sk-abc").unwrap();
        let bytes = envelope.as_bytes();

        for i in 0..bytes.len() {
            let mut tampered = bytes.to_vec();
            tampered[i] = match tampered[i] {
                b'0' => b'1',
                b':' => b'0',
                _ => b'0',
            };
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(
                c.decrypt(&tampered).is_err(),
                "tampering at byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn flipped_ciphertext_reports_authentication_failure() {
        let c = cipher();
        let envelope = c.encrypt("sk-abc").unwrap();
        let (head, ct) = envelope.rsplit_once(':').unwrap();
        let flipped = if ct.starts_with('0') {
            format!("1{}", &ct[1..])
        } else {
            format!("0{}", &ct[1..])
        };
        let result = c.decrypt(&format!("{}:{}", head, flipped));
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn wrong_master_secret_fails() {
        let envelope = cipher().encrypt("sk-abc").unwrap();
        let other = Cipher::new(SecretString::from("a different secret".to_string()), cheap()).unwrap();
        assert!(matches!(
            other.decrypt(&envelope),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn empty_master_secret_is_refused() {
        let result = Cipher::new(SecretString::from("".to_string()), cheap());
        assert!(matches!(result, Err(CryptoError::MissingMasterSecret)));
    }

    #[test]
    fn legacy_envelope_opens_with_legacy_key() {
        let legacy = [9u8; KEY_LEN];
        let c = Cipher::with_legacy_key(SecretString::from("master".to_string()), cheap(), legacy).unwrap();
        let envelope = legacy_seal(&legacy, [4u8; NONCE_LEN], "old-key");

        assert_eq!(c.decrypt(&envelope).unwrap().expose_secret(), "old-key");
        // New writes still use the salted layout.
        assert_eq!(c.encrypt("new").unwrap().split(':').count(), 4);
    }

    #[test]
    fn legacy_envelope_without_legacy_key_fails() {
        let envelope = legacy_seal(&[9u8; KEY_LEN], [4u8; NONCE_LEN], "old-key");
        assert!(matches!(
            cipher().decrypt(&envelope),
            Err(CryptoError::LegacyKeyUnavailable)
        ));
    }

    /// Written by the fixed-key scheme (Node `createCipheriv` with a
    /// 16-byte IV) under a key of 32 `0x09` bytes.
    const NODE_LEGACY_ENVELOPE: &str =
        "3f0cf11943fd52f680ac854cc54be0fc:87b64205ef91611dfceb5327e4854a55:727ef67e1cfffe8929";

    #[test]
    fn legacy_envelope_with_sixteen_byte_iv_opens() {
        let c = Cipher::with_legacy_key(SecretString::from("master".to_string()), cheap(), [9u8; KEY_LEN])
            .unwrap();
        assert_eq!(
            c.decrypt(NODE_LEGACY_ENVELOPE).unwrap().expose_secret(),
            "sk-legacy"
        );
    }

    #[test]
    fn legacy_sixteen_byte_iv_with_wrong_key_fails_closed() {
        let c = Cipher::with_legacy_key(SecretString::from("master".to_string()), cheap(), [7u8; KEY_LEN])
            .unwrap();
        assert!(matches!(
            c.decrypt(NODE_LEGACY_ENVELOPE),
            Err(CryptoError::Authentication)
        ));

        let (head, ct) = NODE_LEGACY_ENVELOPE.rsplit_once(':').unwrap();
        let tampered = format!("{}:00{}", head, &ct[2..]);
        let c = Cipher::with_legacy_key(SecretString::from("master".to_string()), cheap(), [9u8; KEY_LEN])
            .unwrap();
        assert!(matches!(c.decrypt(&tampered), Err(CryptoError::Authentication)));
    }

    #[test]
    fn legacy_envelope_with_odd_iv_length_is_unsupported() {
        let c = Cipher::with_legacy_key(SecretString::from("master".to_string()), cheap(), [9u8; KEY_LEN])
            .unwrap();
        let envelope = format!("{}:{}:{}", "ab".repeat(8), "cd".repeat(TAG_LEN), "00ff");
        assert!(matches!(
            c.decrypt(&envelope),
            Err(CryptoError::UnsupportedNonce(8))
        ));
    }

    #[test]
    fn parse_hex_key_checks_length() {
        assert!(parse_hex_key(&"ab".repeat(KEY_LEN)).is_ok());
        assert!(parse_hex_key(&"ab".repeat(KEY_LEN - 1)).is_err());
        assert!(parse_hex_key("not hex").is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let dbg = format!("{:?}", cipher());
        assert!(!dbg.contains("correct horse"));
        assert!(dbg.contains("[REDACTED]"));
    }
}
