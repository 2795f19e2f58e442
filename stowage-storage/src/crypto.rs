//! Encryption at rest for sensitive payloads.
//!
//! Payloads are serialized to JSON, sealed with AES-256-GCM under a key
//! derived by PBKDF2-HMAC-SHA256, and wrapped in a version-1 [`Envelope`]
//! whose `data` is `base64(iv || ciphertext)`. A fresh random 12-byte IV is
//! drawn for every call. The derived key is computed on first use and kept
//! for the lifetime of the cipher.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::OnceCell;
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;
use stowage_core::{CryptoError, EncryptionConfig, Envelope, ENVELOPE_VERSION};

const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals and opens payload envelopes.
pub struct EnvelopeCipher {
    config: EncryptionConfig,
    cipher: OnceCell<Aes256Gcm>,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("iterations", &self.config.iterations)
            .field("key_derived", &self.cipher.get().is_some())
            .finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    pub fn new(config: EncryptionConfig) -> Self {
        Self {
            config,
            cipher: OnceCell::new(),
        }
    }

    fn cipher(&self) -> Result<&Aes256Gcm, CryptoError> {
        self.cipher.get_or_try_init(|| {
            if self.config.iterations == 0 {
                return Err(CryptoError::KeyDerivation {
                    reason: "iteration count must be positive".to_string(),
                });
            }
            let mut key = [0u8; KEY_LEN];
            pbkdf2_hmac::<Sha256>(
                self.config.passphrase.as_bytes(),
                self.config.salt.as_bytes(),
                self.config.iterations,
                &mut key,
            );
            Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::KeyDerivation {
                reason: e.to_string(),
            })
        })
    }

    /// Encrypt a payload into an envelope.
    pub fn encrypt(&self, value: &serde_json::Value) -> Result<Envelope, CryptoError> {
        let cipher = self.cipher()?;
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CryptoError::EncryptionFailed {
                reason: e.to_string(),
            })?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill(&mut iv);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|e| CryptoError::EncryptionFailed {
                reason: e.to_string(),
            })?;

        let mut sealed = Vec::with_capacity(IV_LEN + ciphertext.len());
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ciphertext);
        Ok(Envelope::new(STANDARD.encode(sealed)))
    }

    /// Decrypt an envelope back into its payload.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<serde_json::Value, CryptoError> {
        let failed = |reason: String| CryptoError::DecryptionFailed { reason };

        if envelope.version != ENVELOPE_VERSION {
            return Err(failed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        let sealed = STANDARD
            .decode(envelope.data.as_bytes())
            .map_err(|e| failed(e.to_string()))?;
        if sealed.len() <= IV_LEN {
            return Err(failed(format!(
                "envelope holds {} bytes, too short for iv and tag",
                sealed.len()
            )));
        }

        let (iv, ciphertext) = sealed.split_at(IV_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|e| failed(e.to_string()))?;
        serde_json::from_slice(&plaintext).map_err(|e| failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(EncryptionConfig {
            iterations: 1_000,
            ..EncryptionConfig::default()
        })
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let value = json!({"token": "abc123", "scopes": ["read", "write"]});
        let envelope = cipher.encrypt(&value).expect("encrypt");
        assert!(envelope.encrypted);
        assert_eq!(envelope.version, ENVELOPE_VERSION);
        assert_eq!(cipher.decrypt(&envelope).expect("decrypt"), value);
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let cipher = cipher();
        let envelope = cipher
            .encrypt(&json!("very-secret-value"))
            .expect("encrypt");
        let raw = serde_json::to_string(&envelope.to_value()).expect("serialize");
        assert!(!raw.contains("very-secret-value"));
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = cipher();
        let a = cipher.encrypt(&json!("same")).expect("encrypt a");
        let b = cipher.encrypt(&json!("same")).expect("encrypt b");
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = cipher().encrypt(&json!({"pin": 1234})).expect("encrypt");
        let other = EnvelopeCipher::new(EncryptionConfig {
            passphrase: "another-passphrase".to_string(),
            iterations: 1_000,
            ..EncryptionConfig::default()
        });
        assert!(matches!(
            other.decrypt(&envelope),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_malformed_envelopes() {
        let cipher = cipher();
        for data in ["not base64 !!", "AAAA", ""] {
            let envelope = Envelope::new(data.to_string());
            assert!(
                cipher.decrypt(&envelope).is_err(),
                "data {:?} should not decrypt",
                data
            );
        }

        let mut envelope = cipher.encrypt(&json!(1)).expect("encrypt");
        envelope.version = 2;
        assert!(cipher.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let cipher = EnvelopeCipher::new(EncryptionConfig {
            iterations: 0,
            ..EncryptionConfig::default()
        });
        assert!(matches!(
            cipher.encrypt(&json!(null)),
            Err(CryptoError::KeyDerivation { .. })
        ));
    }
}
