//! Source text normalization and cache fingerprinting.
//! Key: `translation:{target_lang}:{md5(normalized_text)}`.
//! Case and surrounding whitespace variants collapse onto one key.

use std::fmt;

/// Namespace prefix shared by every cache key this crate writes.
pub const KEY_PREFIX: &str = "translation";

/// Deterministic cache key derived from normalized text and target language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trim surrounding whitespace and lowercase. Unicode-aware, not locale-aware.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Hex md5 digest of the normalized text.
pub fn digest(text: &str) -> String {
    format!("{:x}", md5::compute(normalize(text).as_bytes()))
}

/// Compute the cache key for `text` translated into `target_lang`.
/// Pure: no seeding, stable across restarts.
pub fn fingerprint(text: &str, target_lang: &str) -> CacheKey {
    CacheKey(format!("{KEY_PREFIX}:{target_lang}:{}", digest(text)))
}
