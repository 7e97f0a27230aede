//! Symmetric encryption for credentials and sensitive fields.
//!
//! AES-256-GCM with a fresh random IV per call. The IV travels inside the
//! returned [`Envelope`], so decryption is self-contained: no IV bookkeeping
//! outside the envelope, and no IV is ever reused under the same key.
//! GCM authenticates the ciphertext, so a truncated or tampered envelope
//! fails decryption with [`Error::Integrity`] instead of yielding garbage.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::error;

use crate::error::{Error, Result};

/// GCM IV length in bytes.
const IV_LENGTH: usize = 12;

/// GCM appends a 16-byte authentication tag; anything shorter is truncated.
const MIN_CIPHERTEXT_LENGTH: usize = 16;

/// Self-contained encrypted payload: IV alongside ciphertext.
///
/// The text form is `base64(iv):base64(ciphertext)` for callers that persist
/// or transport envelopes as strings; parsing rejects malformed input with
/// [`Error::Integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            Base64::encode_string(&self.iv),
            Base64::encode_string(&self.ciphertext)
        )
    }
}

impl FromStr for Envelope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (iv, ciphertext) = s.split_once(':').ok_or(Error::Integrity)?;
        let iv = Base64::decode_vec(iv).map_err(|_| Error::Integrity)?;
        let ciphertext = Base64::decode_vec(ciphertext).map_err(|_| Error::Integrity)?;
        if iv.len() != IV_LENGTH || ciphertext.len() < MIN_CIPHERTEXT_LENGTH {
            return Err(Error::Integrity);
        }
        Ok(Self { iv, ciphertext })
    }
}

/// Encryption primitive with a key fixed for the process lifetime.
///
/// Owns no state beyond the cipher instance; key rotation is out of scope.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt `plaintext` under a freshly generated IV.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the plaintext exceeds what GCM can seal.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| Error::InvalidInput("plaintext too large to encrypt"))?;

        Ok(Envelope {
            iv: iv.to_vec(),
            ciphertext,
        })
    }

    /// Decrypt an envelope produced by [`Vault::encrypt`].
    ///
    /// # Errors
    /// Returns `Integrity` when the envelope is malformed, truncated, or does
    /// not authenticate under the vault key.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        if envelope.iv.len() != IV_LENGTH || envelope.ciphertext.len() < MIN_CIPHERTEXT_LENGTH {
            error!("rejecting malformed ciphertext envelope");
            return Err(Error::Integrity);
        }

        self.cipher
            .decrypt(
                Nonce::from_slice(&envelope.iv),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| {
                // A failed tag check can indicate tampering, not just corruption.
                error!("ciphertext envelope failed authentication");
                Error::Integrity
            })
    }
}
