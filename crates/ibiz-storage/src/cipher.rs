use std::fmt;

use aes::{Aes128, Aes256};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ibiz_core::{app_config::AppConfigStore, settings::EncryptionKind};
use rand::Rng;
use thiserror::Error;
use tracing::instrument;

use crate::key_material::{self, KeyMaterial, KeyMaterialError};

const BLOCK_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key material: {0}")]
    KeyMaterial(#[from] KeyMaterialError),
    #[error("cipher init failed: {reason}")]
    InvalidKeyLength { reason: String },
    #[error("decrypted {decrypted} bytes, fewer than two salts of {salt_len} bytes")]
    DecryptLength { decrypted: usize, salt_len: usize },
    #[error("ciphertext is not block aligned or has bad padding")]
    Padding,
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("stored value is not valid base64: {reason}")]
    Encoding { reason: String },
    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Key-size dispatch for the CBC and GCM transforms built from one key.
#[derive(Clone)]
enum Transforms {
    Aes128 {
        encryptor: cbc::Encryptor<Aes128>,
        decryptor: cbc::Decryptor<Aes128>,
        aead: Aes128Gcm,
    },
    Aes256 {
        encryptor: cbc::Encryptor<Aes256>,
        decryptor: cbc::Decryptor<Aes256>,
        aead: Aes256Gcm,
    },
}

impl Transforms {
    fn new(material: &KeyMaterial) -> Result<Self, CipherError> {
        let key = material.key();
        let iv = material.vector().as_slice();
        let transforms = match key.len() {
            16 => Transforms::Aes128 {
                encryptor: cbc::Encryptor::new_from_slices(key, iv).map_err(init_err)?,
                decryptor: cbc::Decryptor::new_from_slices(key, iv).map_err(init_err)?,
                aead: Aes128Gcm::new_from_slice(key).map_err(init_err)?,
            },
            _ => Transforms::Aes256 {
                encryptor: cbc::Encryptor::new_from_slices(key, iv).map_err(init_err)?,
                decryptor: cbc::Decryptor::new_from_slices(key, iv).map_err(init_err)?,
                aead: Aes256Gcm::new_from_slice(key).map_err(init_err)?,
            },
        };
        Ok(transforms)
    }

    fn cbc_encrypt(&self, plain: &[u8]) -> Vec<u8> {
        match self {
            Transforms::Aes128 { encryptor, .. } => {
                encryptor.clone().encrypt_padded_vec_mut::<Pkcs7>(plain)
            }
            Transforms::Aes256 { encryptor, .. } => {
                encryptor.clone().encrypt_padded_vec_mut::<Pkcs7>(plain)
            }
        }
    }

    fn cbc_decrypt(&self, cipher_text: &[u8]) -> Result<Vec<u8>, CipherError> {
        if cipher_text.is_empty() || cipher_text.len() % BLOCK_LEN != 0 {
            return Err(CipherError::Padding);
        }
        let decrypted = match self {
            Transforms::Aes128 { decryptor, .. } => {
                decryptor.clone().decrypt_padded_vec_mut::<Pkcs7>(cipher_text)
            }
            Transforms::Aes256 { decryptor, .. } => {
                decryptor.clone().decrypt_padded_vec_mut::<Pkcs7>(cipher_text)
            }
        };
        decrypted.map_err(|_| CipherError::Padding)
    }

    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (nonce, sealed) = match self {
            Transforms::Aes128 { aead, .. } => {
                let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
                (nonce, aead.encrypt(&nonce, plain))
            }
            Transforms::Aes256 { aead, .. } => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                (nonce, aead.encrypt(&nonce, plain))
            }
        };
        let sealed = sealed.map_err(|_| CipherError::Authentication)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::Authentication);
        }
        let (nonce, cipher_text) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);
        let opened = match self {
            Transforms::Aes128 { aead, .. } => aead.decrypt(nonce, cipher_text),
            Transforms::Aes256 { aead, .. } => aead.decrypt(nonce, cipher_text),
        };
        opened.map_err(|_| CipherError::Authentication)
    }
}

/// Encrypts and decrypts individual setting values.
///
/// `AesCbc` is the salted legacy scheme: `salt ‖ text ‖ salt2` under AES-CBC
/// with PKCS#7 padding, where both salts are random non-zero bytes of
/// `salt_len`. On decrypt the salts are dropped by position and never checked,
/// so damage to them goes unnoticed. `AesGcm` seals the bare text with a random
/// nonce and rejects any tampering.
#[derive(Clone)]
pub struct CipherProvider {
    salt_len: usize,
    transforms: Transforms,
}

impl fmt::Debug for CipherProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherProvider")
            .field("salt_len", &self.salt_len)
            .finish_non_exhaustive()
    }
}

impl CipherProvider {
    pub fn new(material: &KeyMaterial) -> Result<Self, CipherError> {
        Ok(Self {
            salt_len: material.salt_len(),
            transforms: Transforms::new(material)?,
        })
    }

    /// Load key material from the application configuration, generating and
    /// persisting it first when missing or inconsistent.
    #[instrument(skip_all)]
    pub fn from_store(store: &dyn AppConfigStore) -> Result<Self, CipherError> {
        let material = key_material::load_or_generate(store)?;
        Self::new(&material)
    }

    /// Salted CBC encryption of `text`; output is block aligned.
    pub fn encrypt(&self, text: &str) -> Vec<u8> {
        let payload = text.as_bytes();
        let mut buf = Vec::with_capacity(2 * self.salt_len + payload.len());
        buf.extend(non_zero_bytes(self.salt_len));
        buf.extend_from_slice(payload);
        buf.extend(non_zero_bytes(self.salt_len));
        self.transforms.cbc_encrypt(&buf)
    }

    /// Inverse of [`encrypt`](Self::encrypt). Fails cleanly when the decrypted
    /// buffer is shorter than both salts together.
    pub fn decrypt(&self, cipher_text: &[u8]) -> Result<String, CipherError> {
        let decrypted = self.transforms.cbc_decrypt(cipher_text)?;
        let payload_len = decrypted
            .len()
            .checked_sub(2 * self.salt_len)
            .ok_or(CipherError::DecryptLength {
                decrypted: decrypted.len(),
                salt_len: self.salt_len,
            })?;
        let payload = decrypted[self.salt_len..self.salt_len + payload_len].to_vec();
        Ok(String::from_utf8(payload)?)
    }

    /// Base64 of [`encrypt`](Self::encrypt); the empty string maps to itself.
    pub fn encrypt_string(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        general_purpose::STANDARD.encode(self.encrypt(text))
    }

    /// Inverse of [`encrypt_string`](Self::encrypt_string).
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CipherError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        self.decrypt(&decode(encoded)?)
    }

    /// Encode `text` for storage under `kind`.
    pub fn encrypt_as(&self, kind: EncryptionKind, text: &str) -> Result<String, CipherError> {
        match kind {
            EncryptionKind::None => Ok(text.to_string()),
            EncryptionKind::AesCbc => Ok(self.encrypt_string(text)),
            EncryptionKind::AesGcm if text.is_empty() => Ok(String::new()),
            EncryptionKind::AesGcm => {
                let sealed = self.transforms.seal(text.as_bytes())?;
                Ok(general_purpose::STANDARD.encode(sealed))
            }
        }
    }

    /// Recover the plaintext of a value stored under `kind`.
    pub fn decrypt_as(&self, kind: EncryptionKind, stored: &str) -> Result<String, CipherError> {
        match kind {
            EncryptionKind::None => Ok(stored.to_string()),
            EncryptionKind::AesCbc => self.decrypt_string(stored),
            EncryptionKind::AesGcm if stored.is_empty() => Ok(String::new()),
            EncryptionKind::AesGcm => {
                let opened = self.transforms.open(&decode(stored)?)?;
                Ok(String::from_utf8(opened)?)
            }
        }
    }
}

fn non_zero_bytes(len: usize) -> impl Iterator<Item = u8> {
    let mut rng = OsRng;
    (0..len).map(move |_| rng.gen_range(1..=u8::MAX))
}

fn decode(encoded: &str) -> Result<Vec<u8>, CipherError> {
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| CipherError::Encoding {
            reason: e.to_string(),
        })
}

fn init_err<E: ToString>(err: E) -> CipherError {
    CipherError::InvalidKeyLength {
        reason: err.to_string(),
    }
}
