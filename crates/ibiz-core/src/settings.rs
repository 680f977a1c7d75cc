use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use strum::{Display, EnumIter, EnumString};

/// How the bytes of a stored setting value must be interpreted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum EncryptionKind {
    /// Plaintext.
    #[default]
    None,
    /// Legacy salted AES-CBC. Salts are stripped positionally and never verified.
    AesCbc,
    /// Authenticated AES-GCM; tampering is detected on decrypt.
    AesGcm,
}

impl EncryptionKind {
    pub fn is_encrypted(self) -> bool {
        self != EncryptionKind::None
    }

    /// Numeric tags written by older settings files (enum ordinal).
    fn from_ordinal(value: u64) -> Option<Self> {
        match value {
            0 => Some(EncryptionKind::None),
            1 => Some(EncryptionKind::AesCbc),
            2 => Some(EncryptionKind::AesGcm),
            _ => None,
        }
    }
}

impl Serialize for EncryptionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EncryptionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KindVisitor;

        impl Visitor<'_> for KindVisitor {
            type Value = EncryptionKind;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an encryption kind name or ordinal")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                EncryptionKind::from_str(v)
                    .map_err(|_| E::custom(format!("unknown encryption kind `{v}`")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                EncryptionKind::from_ordinal(v)
                    .ok_or_else(|| E::custom(format!("unknown encryption ordinal {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(EncryptionKind::from_ordinal)
                    .ok_or_else(|| E::custom(format!("unknown encryption ordinal {v}")))
            }
        }

        deserializer.deserialize_any(KindVisitor)
    }
}

/// One configuration value as persisted in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    #[serde(rename = "Encryption", default)]
    pub encryption: EncryptionKind,
    /// Plaintext, or base64 ciphertext when `encryption` is not `None`.
    #[serde(rename = "Value", default)]
    pub value: String,
}

impl SettingEntry {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            encryption: EncryptionKind::None,
            value: value.into(),
        }
    }

    /// An empty value never carries an encryption tag.
    pub fn new(value: impl Into<String>, encryption: EncryptionKind) -> Self {
        let value = value.into();
        let encryption = if value.is_empty() {
            EncryptionKind::None
        } else {
            encryption
        };
        Self { encryption, value }
    }
}

/// Key-ordered map of settings; the in-memory mirror of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsStore {
    entries: BTreeMap<String, SettingEntry>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite, returning the previous entry.
    pub fn insert(&mut self, key: impl Into<String>, entry: SettingEntry) -> Option<SettingEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse the settings-file JSON document. Unknown entry fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Pretty JSON with keys in sorted order, so equal stores serialise identically.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_settings_file_shape_and_ignores_unknown_fields() {
        let json = r#"{
            "ExternalKey": { "Encryption": "AesCbc", "Value": "abc=", "Comment": "ignored" },
            "ProductId": { "Encryption": "None", "Value": "42" }
        }"#;
        let store = SettingsStore::from_json(json).expect("parse");

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("ExternalKey"),
            Some(&SettingEntry {
                encryption: EncryptionKind::AesCbc,
                value: "abc=".into(),
            })
        );
        assert_eq!(store.get("ProductId"), Some(&SettingEntry::plain("42")));
    }

    #[test]
    fn encryption_tag_accepts_any_case_and_ordinals() {
        let json = r#"{
            "a": { "Encryption": "aesgcm", "Value": "x" },
            "b": { "Encryption": 1, "Value": "y" },
            "c": { "Value": "z" }
        }"#;
        let store = SettingsStore::from_json(json).expect("parse");

        assert_eq!(store.get("a").unwrap().encryption, EncryptionKind::AesGcm);
        assert_eq!(store.get("b").unwrap().encryption, EncryptionKind::AesCbc);
        assert_eq!(store.get("c").unwrap().encryption, EncryptionKind::None);
    }

    #[test]
    fn rejects_unknown_encryption_tag() {
        let json = r#"{ "a": { "Encryption": "Rot13", "Value": "x" } }"#;
        assert!(SettingsStore::from_json(json).is_err());
    }

    #[test]
    fn serialisation_is_sorted_and_stable() {
        let mut store = SettingsStore::new();
        store.insert("zeta", SettingEntry::plain("1"));
        store.insert("alpha", SettingEntry::new("c2VjcmV0", EncryptionKind::AesGcm));

        let first = store.to_json().expect("json");
        let second = store.to_json().expect("json");
        assert_eq!(first, second);
        assert!(first.find("alpha").unwrap() < first.find("zeta").unwrap());
        assert!(first.contains(r#""Encryption": "AesGcm""#));
    }

    #[test]
    fn empty_value_drops_encryption_tag() {
        let entry = SettingEntry::new("", EncryptionKind::AesCbc);
        assert_eq!(entry.encryption, EncryptionKind::None);
    }
}
