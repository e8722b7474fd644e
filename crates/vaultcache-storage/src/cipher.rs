//! Cipher boundary for the "secure" cache.
//!
//! When a cipher is supplied, only the `Value` column is encrypted; `Key`,
//! `TypeName`, `Expiration`, and `CreatedAt` stay plaintext so the indexed
//! hot paths (by-key, by-type, by-expiration) never need to decrypt.

use vaultcache_core::CacheError;

/// `encrypt`/`decrypt` over `(bytes, key_context) -> bytes`. `key_context`
/// is the row's `Key`, bound in as associated data so a ciphertext cannot
/// be replayed under a different key.
pub trait Cipher: Send + Sync + 'static {
    fn encrypt(&self, plaintext: &[u8], key_context: &str) -> Result<Vec<u8>, CacheError>;
    fn decrypt(&self, ciphertext: &[u8], key_context: &str) -> Result<Vec<u8>, CacheError>;
}

/// Identity cipher used by the default (non-secure) engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8], _key_context: &str) -> Result<Vec<u8>, CacheError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8], _key_context: &str) -> Result<Vec<u8>, CacheError> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(feature = "secure")]
mod secure {
    use super::*;
    use chacha20poly1305::{
        aead::{Aead, AeadCore, KeyInit, OsRng},
        XChaCha20Poly1305, XNonce,
    };

    const NONCE_LEN: usize = 24;

    /// XChaCha20-Poly1305-backed cipher. The "secure" cache location is
    /// exactly the default engine with this cipher supplied at construction.
    pub struct SecureCipher {
        aead: XChaCha20Poly1305,
    }

    impl SecureCipher {
        /// `key` must be exactly 32 bytes.
        pub fn new(key: &[u8; 32]) -> Self {
            Self {
                aead: XChaCha20Poly1305::new(key.into()),
            }
        }
    }

    impl Cipher for SecureCipher {
        fn encrypt(&self, plaintext: &[u8], key_context: &str) -> Result<Vec<u8>, CacheError> {
            let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
            let payload = chacha20poly1305::aead::Payload {
                msg: plaintext,
                aad: key_context.as_bytes(),
            };
            let ciphertext = self
                .aead
                .encrypt(&nonce, payload)
                .map_err(|e| CacheError::Storage(format!("encrypt failed: {e}")))?;

            let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            out.extend_from_slice(nonce.as_slice());
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }

        fn decrypt(&self, ciphertext: &[u8], key_context: &str) -> Result<Vec<u8>, CacheError> {
            if ciphertext.len() < NONCE_LEN {
                return Err(CacheError::Storage("ciphertext too short".into()));
            }
            let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
            let nonce = XNonce::from_slice(nonce_bytes);
            let payload = chacha20poly1305::aead::Payload {
                msg: body,
                aad: key_context.as_bytes(),
            };
            self.aead
                .decrypt(nonce, payload)
                .map_err(|e| CacheError::Storage(format!("decrypt failed: {e}")))
        }
    }
}

#[cfg(feature = "secure")]
pub use secure::SecureCipher;
