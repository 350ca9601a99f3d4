//! Authenticated encryption for stored credentials.
//!
//! Envelope (JSON, binary fields base64):
//!
//! ```text
//! {"v":1,"kdf":"pbkdf2-sha256","iter":100000,"salt":"..","nonce":"..","ct":".."}
//! ```
//!
//! The key is PBKDF2-HMAC-SHA256 over `<secret>:<shop>` with a fresh salt per
//! write; the cipher is AES-256-GCM with a fresh nonce per write and the shop
//! as associated data, so an envelope copied to another shop fails to open.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Result, TillitError};

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// Envelopes claiming fewer or more rounds than this are refused.
pub const MIN_KDF_ITERATIONS: u32 = 1_000;
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

const ENVELOPE_VERSION: u8 = 1;
const KDF_NAME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    kdf: String,
    iter: u32,
    salt: String,
    nonce: String,
    ct: String,
}

/// Seals and opens credential blobs under a storage secret.
#[derive(Debug, Clone)]
pub struct CredentialCipher {
    secret: SecretString,
    iterations: u32,
}

impl CredentialCipher {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Rounds used for new envelopes, clamped to the accepted range.
    pub fn iterations(mut self, n: u32) -> Self {
        self.iterations = n.clamp(MIN_KDF_ITERATIONS, MAX_KDF_ITERATIONS);
        self
    }

    fn derive_key(&self, shop: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
        let password = format!("{}:{shop}", self.secret.expose_secret());
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        key
    }

    /// Encrypt `plaintext` for `shop`, returning the serialized envelope.
    pub fn seal(&self, shop: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive_key(shop, &salt, self.iterations);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ct = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: shop.as_bytes(),
                },
            )
            .map_err(|_| TillitError::Crypto("encryption failed".into()))?;

        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            kdf: KDF_NAME.to_string(),
            iter: self.iterations,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ct: STANDARD.encode(ct),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decrypt an envelope produced by [`seal`](Self::seal) for `shop`.
    pub fn open(&self, shop: &str, sealed: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope = serde_json::from_slice(sealed)
            .map_err(|e| TillitError::Crypto(format!("unreadable envelope: {e}")))?;
        if envelope.v != ENVELOPE_VERSION || envelope.kdf != KDF_NAME {
            return Err(TillitError::Crypto(format!(
                "unsupported envelope v{} ({})",
                envelope.v, envelope.kdf
            )));
        }
        if !(MIN_KDF_ITERATIONS..=MAX_KDF_ITERATIONS).contains(&envelope.iter) {
            return Err(TillitError::Crypto(format!(
                "envelope iteration count {} out of range",
                envelope.iter
            )));
        }

        let salt = decode_field("salt", &envelope.salt, Some(SALT_LEN))?;
        let nonce = decode_field("nonce", &envelope.nonce, Some(NONCE_LEN))?;
        let ct = decode_field("ct", &envelope.ct, None)?;

        let key = self.derive_key(shop, &salt, envelope.iter);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ct,
                    aad: shop.as_bytes(),
                },
            )
            .map_err(|_| TillitError::Crypto("decryption failed".into()))
    }
}

fn decode_field(name: &str, value: &str, len: Option<usize>) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|e| TillitError::Crypto(format!("bad base64 in {name}: {e}")))?;
    match len {
        Some(len) if bytes.len() != len => Err(TillitError::Crypto(format!(
            "{name} must be {len} bytes, got {}",
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}
