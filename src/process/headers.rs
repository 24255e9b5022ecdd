use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static NON_KEY_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("key pattern is valid"));

/// Canonical column key: `"Equípo Local"` → `"equipo_local"`.
///
/// Diacritics are dropped after NFKD, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_-]` is removed and the result is lowercased. An empty
/// header yields an empty key. Applying it twice changes nothing.
pub fn normalize_header(raw: &str) -> String {
    let stripped: String = raw
        .trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    let underscored = WHITESPACE_RUN.replace_all(&stripped, "_");
    NON_KEY_CHAR
        .replace_all(&underscored, "")
        .to_ascii_lowercase()
}
