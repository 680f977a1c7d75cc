use std::{
    fmt,
    ops::Range,
    sync::{Mutex, PoisonError},
};

use base64::{engine::general_purpose, Engine as _};
use ibiz_core::app_config::{AppConfigError, AppConfigStore};
use rand::{rngs::OsRng, Rng, RngCore};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_KEY: &str = "ConfigKey";
pub const CONFIG_VECTOR: &str = "ConfigVector";
pub const CONFIG_SALT: &str = "ConfigSalt";

/// Length of generated keys (AES-256). 16-byte keys are still accepted on load.
pub const KEY_LEN: usize = 32;
/// CBC initialization vector length; one AES block.
pub const VECTOR_LEN: usize = 16;

const SALT_LEN_RANGE: Range<i32> = 2048..4096;
/// Largest salt length accepted on load. Generated salts always fit; smaller
/// legacy salts are kept as-is.
pub const MAX_SALT_LEN: usize = 4096;

/// Serialises load-check-generate so a process generates material at most once
/// per store, even when several providers are constructed concurrently.
static PROVISION_LOCK: Mutex<()> = Mutex::new(());

/// Symmetric key, CBC vector and salt length for the value cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: Vec<u8>,
    vector: [u8; VECTOR_LEN],
    salt_len: usize,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never log key bytes
        f.debug_struct("KeyMaterial")
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt_len)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("key material store: {0}")]
    Store(#[from] AppConfigError),
    #[error("no key material present")]
    Absent,
    #[error("key material incomplete: `{name}` is missing")]
    Missing { name: &'static str },
    #[error("key material `{name}` is not valid base64: {reason}")]
    Decode { name: &'static str, reason: String },
    #[error("key material `{name}` has {actual} bytes, expected {expected}")]
    Length {
        name: &'static str,
        expected: String,
        actual: usize,
    },
    #[error("salt length {actual} is outside 0..=4096")]
    SaltLength { actual: i64 },
}

impl KeyMaterialError {
    /// Whether the stored material is partial or corrupt (as opposed to absent
    /// or unreachable).
    pub fn is_inconsistent(&self) -> bool {
        !matches!(self, KeyMaterialError::Store(_) | KeyMaterialError::Absent)
    }
}

/// One independently regenerable part of the key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum KeyComponent {
    Key,
    Vector,
    Salt,
}

impl KeyComponent {
    pub fn config_name(self) -> &'static str {
        match self {
            KeyComponent::Key => CONFIG_KEY,
            KeyComponent::Vector => CONFIG_VECTOR,
            KeyComponent::Salt => CONFIG_SALT,
        }
    }
}

impl KeyMaterial {
    pub fn new(
        key: Vec<u8>,
        vector: [u8; VECTOR_LEN],
        salt_len: usize,
    ) -> Result<Self, KeyMaterialError> {
        if key.len() != 16 && key.len() != KEY_LEN {
            return Err(KeyMaterialError::Length {
                name: CONFIG_KEY,
                expected: format!("16 or {KEY_LEN}"),
                actual: key.len(),
            });
        }
        if salt_len > MAX_SALT_LEN {
            return Err(KeyMaterialError::SaltLength {
                actual: i64::try_from(salt_len).unwrap_or(i64::MAX),
            });
        }
        Ok(Self {
            key,
            vector,
            salt_len,
        })
    }

    /// Fresh random key, vector and salt length.
    pub fn generate() -> Self {
        Self {
            key: generate_key().to_vec(),
            vector: generate_vector(),
            salt_len: generate_salt_len(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn vector(&self) -> &[u8; VECTOR_LEN] {
        &self.vector
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    fn replace(&mut self, component: KeyComponent) {
        match component {
            KeyComponent::Key => self.key = generate_key().to_vec(),
            KeyComponent::Vector => self.vector = generate_vector(),
            KeyComponent::Salt => self.salt_len = generate_salt_len(),
        }
    }
}

/// A fresh random AES-256 key, independent of any stored material.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A fresh random CBC vector, independent of any stored material.
pub fn generate_vector() -> [u8; VECTOR_LEN] {
    let mut bytes = [0u8; VECTOR_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn generate_salt_len() -> usize {
    let len = OsRng.gen_range(SALT_LEN_RANGE);
    // range is positive
    len.unsigned_abs() as usize
}

/// Strictly load material from the store; never generates.
pub fn load(store: &dyn AppConfigStore) -> Result<KeyMaterial, KeyMaterialError> {
    let key = store.get(CONFIG_KEY)?;
    let vector = store.get(CONFIG_VECTOR)?;
    let salt = store.get(CONFIG_SALT)?;

    let (key, vector, salt) = match (key, vector, salt) {
        (None, None, None) => return Err(KeyMaterialError::Absent),
        (Some(k), Some(v), Some(s)) => (k, v, s),
        (None, _, _) => return Err(KeyMaterialError::Missing { name: CONFIG_KEY }),
        (_, None, _) => return Err(KeyMaterialError::Missing { name: CONFIG_VECTOR }),
        (_, _, None) => return Err(KeyMaterialError::Missing { name: CONFIG_SALT }),
    };

    let key = decode(CONFIG_KEY, &key)?;
    let vector: [u8; VECTOR_LEN] =
        decode(CONFIG_VECTOR, &vector)?
            .try_into()
            .map_err(|bytes: Vec<u8>| KeyMaterialError::Length {
                name: CONFIG_VECTOR,
                expected: VECTOR_LEN.to_string(),
                actual: bytes.len(),
            })?;
    let salt: [u8; 4] =
        decode(CONFIG_SALT, &salt)?
            .try_into()
            .map_err(|bytes: Vec<u8>| KeyMaterialError::Length {
                name: CONFIG_SALT,
                expected: "4".to_string(),
                actual: bytes.len(),
            })?;
    let salt = i32::from_le_bytes(salt);
    let salt_len = usize::try_from(salt).map_err(|_| KeyMaterialError::SaltLength {
        actual: i64::from(salt),
    })?;

    KeyMaterial::new(key, vector, salt_len)
}

/// Load material, generating and persisting a full replacement when it is
/// absent, partial or corrupt. Only store failures are returned.
pub fn load_or_generate(store: &dyn AppConfigStore) -> Result<KeyMaterial, KeyMaterialError> {
    let _guard = PROVISION_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    match load(store) {
        Ok(material) => Ok(material),
        Err(KeyMaterialError::Store(err)) => Err(KeyMaterialError::Store(err)),
        Err(reason) => {
            if reason.is_inconsistent() {
                warn!(%reason, "key material inconsistent; regenerating");
            } else {
                info!("no key material found; generating");
            }
            let material = KeyMaterial::generate();
            persist(store, &material)?;
            Ok(material)
        }
    }
}

/// Replace one component (or all three when `component` is `None`) and persist.
/// Values encrypted under the previous material become unreadable.
pub fn regenerate(
    store: &dyn AppConfigStore,
    component: Option<KeyComponent>,
) -> Result<KeyMaterial, KeyMaterialError> {
    let _guard = PROVISION_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let material = match (component, load(store)) {
        (_, Err(KeyMaterialError::Store(err))) => return Err(KeyMaterialError::Store(err)),
        (Some(component), Ok(mut existing)) => {
            existing.replace(component);
            existing
        }
        (None, _) | (Some(_), Err(_)) => KeyMaterial::generate(),
    };

    info!(component = ?component, "regenerated key material");
    persist(store, &material)?;
    Ok(material)
}

fn persist(store: &dyn AppConfigStore, material: &KeyMaterial) -> Result<(), KeyMaterialError> {
    let salt = i32::try_from(material.salt_len).map_err(|_| KeyMaterialError::Length {
        name: CONFIG_SALT,
        expected: "a 32-bit length".to_string(),
        actual: material.salt_len,
    })?;

    store.set(CONFIG_KEY, &general_purpose::STANDARD.encode(&material.key))?;
    store.set(CONFIG_VECTOR, &general_purpose::STANDARD.encode(material.vector))?;
    store.set(CONFIG_SALT, &general_purpose::STANDARD.encode(salt.to_le_bytes()))?;
    Ok(())
}

fn decode(name: &'static str, value: &str) -> Result<Vec<u8>, KeyMaterialError> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| KeyMaterialError::Decode {
            name,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use ibiz_core::app_config::InMemoryAppConfig;

    use super::*;

    #[test]
    fn generates_and_persists_when_absent() {
        let store = InMemoryAppConfig::new();
        let generated = load_or_generate(&store).expect("generate");

        assert_eq!(generated.key().len(), KEY_LEN);
        assert!(SALT_LEN_RANGE.contains(&(generated.salt_len() as i32)));
        assert!(store.get(CONFIG_KEY).unwrap().is_some());
        assert!(store.get(CONFIG_VECTOR).unwrap().is_some());
        assert!(store.get(CONFIG_SALT).unwrap().is_some());

        let reloaded = load(&store).expect("reload");
        assert_eq!(reloaded, generated);
    }

    #[test]
    fn reads_legacy_layout() {
        // 16-byte key, salt stored as little-endian i32
        let store = InMemoryAppConfig::with_values([
            (CONFIG_KEY, general_purpose::STANDARD.encode([7u8; 16])),
            (CONFIG_VECTOR, general_purpose::STANDARD.encode([9u8; 16])),
            (CONFIG_SALT, general_purpose::STANDARD.encode(8i32.to_le_bytes())),
        ]);
        let material = load(&store).expect("load");

        assert_eq!(material.key(), &[7u8; 16]);
        assert_eq!(material.vector(), &[9u8; 16]);
        assert_eq!(material.salt_len(), 8);
    }

    #[test]
    fn partial_material_is_inconsistent_and_regenerated() {
        let store = InMemoryAppConfig::with_values([(
            CONFIG_KEY,
            general_purpose::STANDARD.encode([1u8; KEY_LEN]),
        )]);

        let err = load(&store).expect_err("partial material");
        assert!(matches!(err, KeyMaterialError::Missing { name: CONFIG_VECTOR }));
        assert!(err.is_inconsistent());

        let material = load_or_generate(&store).expect("regenerate");
        assert_ne!(material.key(), &[1u8; KEY_LEN]);
        assert_eq!(load(&store).expect("consistent now"), material);
    }

    #[test]
    fn corrupt_material_is_rejected() {
        let store = InMemoryAppConfig::with_values([
            (CONFIG_KEY, general_purpose::STANDARD.encode([1u8; 20])),
            (CONFIG_VECTOR, general_purpose::STANDARD.encode([2u8; 16])),
            (CONFIG_SALT, "not base64!".to_string()),
        ]);
        assert!(matches!(
            load(&store).expect_err("bad salt"),
            KeyMaterialError::Decode { name: CONFIG_SALT, .. }
        ));

        store
            .set(CONFIG_SALT, &general_purpose::STANDARD.encode((-1i32).to_le_bytes()))
            .unwrap();
        assert!(matches!(
            load(&store).expect_err("negative salt"),
            KeyMaterialError::SaltLength { actual: -1 }
        ));

        store
            .set(CONFIG_SALT, &general_purpose::STANDARD.encode(8i32.to_le_bytes()))
            .unwrap();
        assert!(matches!(
            load(&store).expect_err("bad key length"),
            KeyMaterialError::Length { name: CONFIG_KEY, actual: 20, .. }
        ));
    }

    #[test]
    fn oversized_salt_is_regenerated() {
        let store = InMemoryAppConfig::with_values([
            (CONFIG_KEY, general_purpose::STANDARD.encode([1u8; KEY_LEN])),
            (CONFIG_VECTOR, general_purpose::STANDARD.encode([2u8; VECTOR_LEN])),
            (CONFIG_SALT, general_purpose::STANDARD.encode(i32::MAX.to_le_bytes())),
        ]);

        let err = load(&store).expect_err("oversized salt");
        assert!(matches!(
            err,
            KeyMaterialError::SaltLength { actual } if actual == i64::from(i32::MAX)
        ));
        assert!(err.is_inconsistent());

        let material = load_or_generate(&store).expect("regenerate");
        assert!(material.salt_len() <= MAX_SALT_LEN);
        assert_eq!(load(&store).expect("consistent now"), material);
    }

    #[test]
    fn salt_at_the_ceiling_is_accepted() {
        let material =
            KeyMaterial::new(vec![0; KEY_LEN], [0; VECTOR_LEN], MAX_SALT_LEN).expect("material");
        assert_eq!(material.salt_len(), MAX_SALT_LEN);
        assert!(KeyMaterial::new(vec![0; KEY_LEN], [0; VECTOR_LEN], MAX_SALT_LEN + 1).is_err());
    }

    #[test]
    fn regenerate_single_component_keeps_the_rest() {
        let store = InMemoryAppConfig::new();
        let original = load_or_generate(&store).expect("generate");

        let rotated = regenerate(&store, Some(KeyComponent::Vector)).expect("rotate");
        assert_eq!(rotated.key(), original.key());
        assert_eq!(rotated.salt_len(), original.salt_len());
        assert_ne!(rotated.vector(), original.vector());
        assert_eq!(load(&store).expect("load"), rotated);
    }

    #[test]
    fn concurrent_first_use_generates_once() {
        let store = Arc::new(InMemoryAppConfig::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || load_or_generate(&*store).expect("load"))
            })
            .collect();

        let materials: Vec<KeyMaterial> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();
        assert!(materials.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn debug_output_redacts_key_bytes() {
        let material = KeyMaterial::new(vec![0xAB; 16], [0; VECTOR_LEN], 4).expect("material");
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("171"));
        assert!(rendered.contains("key_len"));
    }
}
