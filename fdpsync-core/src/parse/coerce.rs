//! Canonical field formats. Anything else is rejected, never guessed at.

use chrono::{NaiveDate, NaiveDateTime};

/// `-?digits[.digits]`
pub fn nav(raw: &str) -> Option<f64> {
    let unsigned = raw.strip_prefix('-').unwrap_or(raw);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(int) || !frac.map_or(true, digits) {
        return None;
    }
    raw.parse().ok()
}

/// `YYYY-MM-DD`
pub fn date(raw: &str) -> Option<NaiveDate> {
    if !shape(raw, "dddd-dd-dd") {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// `YYYY-MM-DDTHH:MM:SS`
pub fn timestamp(raw: &str) -> Option<NaiveDateTime> {
    if !shape(raw, "dddd-dd-ddTdd:dd:dd") {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Three upper-case ASCII letters.
pub fn currency(raw: &str) -> Option<String> {
    (raw.len() == 3 && raw.bytes().all(|b| b.is_ascii_uppercase())).then(|| raw.to_string())
}

/// `d` matches any ASCII digit, every other pattern byte matches itself.
fn shape(raw: &str, pattern: &str) -> bool {
    raw.len() == pattern.len()
        && raw.bytes().zip(pattern.bytes()).all(|(b, p)| match p {
            b'd' => b.is_ascii_digit(),
            _ => b == p,
        })
}
