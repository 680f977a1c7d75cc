use std::path::PathBuf;

use ibiz_core::settings::EncryptionKind;
use thiserror::Error;

/// A resolved value did not parse as the requested type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("expected {target}: {reason}")]
pub struct ConversionError {
    pub target: &'static str,
    pub reason: String,
}

/// Conversion from a resolved (already decrypted) setting string.
pub trait FromSetting: Sized {
    fn from_setting(raw: &str) -> Result<Self, ConversionError>;
}

/// Implement [`FromSetting`] through `FromStr`, ignoring surrounding whitespace.
///
/// Enumerations opt in with a case-insensitive `FromStr`, for example strum's
/// `EnumString` with `#[strum(ascii_case_insensitive)]`.
#[macro_export]
macro_rules! from_setting_via_from_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::convert::FromSetting for $ty {
                fn from_setting(raw: &str) -> Result<Self, $crate::convert::ConversionError> {
                    <$ty as ::std::str::FromStr>::from_str(raw.trim()).map_err(|e| {
                        $crate::convert::ConversionError {
                            target: ::std::any::type_name::<$ty>(),
                            reason: e.to_string(),
                        }
                    })
                }
            }
        )+
    };
}

from_setting_via_from_str!(
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    char,
    EncryptionKind,
);

impl FromSetting for String {
    fn from_setting(raw: &str) -> Result<Self, ConversionError> {
        Ok(raw.to_string())
    }
}

impl FromSetting for PathBuf {
    fn from_setting(raw: &str) -> Result<Self, ConversionError> {
        Ok(PathBuf::from(raw))
    }
}

impl FromSetting for bool {
    fn from_setting(raw: &str) -> Result<Self, ConversionError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(ConversionError {
                target: "bool",
                reason: "expected `true` or `false`".to_string(),
            })
        }
    }
}
