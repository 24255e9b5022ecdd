use crate::schema::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static NON_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9.\-]").expect("numeric strip pattern is valid"));

/// Windows-1252 code points for bytes 0x80..=0x9F; the five undefined slots
/// fall through to their Latin-1 control characters.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// 1) Drop a leading byte-order mark.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// 2) Decode a response body. UTF-8 is borrowed as-is. A body with no valid
/// multi-byte UTF-8 sequence at all is read as Windows-1252, which is what
/// spreadsheet exports fall back to; otherwise stray bytes become U+FFFD.
pub fn decode_body(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) if has_multibyte_utf8(bytes) => String::from_utf8_lossy(bytes),
        Err(_) => Cow::Owned(
            bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
                    _ => b as char,
                })
                .collect(),
        ),
    }
}

fn has_multibyte_utf8(mut bytes: &[u8]) -> bool {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => return !s.is_ascii(),
            Err(e) => {
                let valid = e.valid_up_to();
                if !bytes[..valid].is_ascii() {
                    return true;
                }
                match e.error_len() {
                    Some(len) => bytes = &bytes[valid + len..],
                    None => return false,
                }
            }
        }
    }
}

/// 3) Coerce an already-trimmed cell from a numeric column.
///
/// Empty is `Null` so "no data" stays distinct from zero. Noise such as units
/// is stripped before parsing (`"24 goles"` → 24); anything still unparsable
/// is kept verbatim as text.
pub fn coerce_number(trimmed: &str) -> Value {
    if trimmed.is_empty() {
        return Value::Null;
    }
    let digits = NON_NUMERIC.replace_all(trimmed, "");
    match digits.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => Value::Text(trimmed.to_string()),
    }
}
