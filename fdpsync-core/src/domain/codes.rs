//! Fixed-format instrument codes: ISIN (ISO 6166) and LEI (ISO 17442).
//!
//! Both types can only be constructed through validating parsers, so any
//! `Isin` or `Lei` in the system is known to be well-formed and to carry a
//! correct check digit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a code failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("expected {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid character '{ch}' at position {position}")]
    Character { ch: char, position: usize },

    #[error("country prefix '{0}' must be two letters")]
    CountryPrefix(String),

    #[error("check digit mismatch: expected {expected}, found {found}")]
    Checksum { expected: String, found: String },
}

/// International Securities Identification Number.
///
/// Stored upper-cased. Input is trimmed and may be lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isin(String);

impl Isin {
    pub const LEN: usize = 12;

    /// Validate and normalize an ISIN.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let code = normalize(raw, Self::LEN)?;
        let prefix = &code[..2];
        if !prefix.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(CodeError::CountryPrefix(prefix.to_string()));
        }
        let found = code.as_bytes()[Self::LEN - 1] as char;
        if !found.is_ascii_digit() {
            return Err(CodeError::Character {
                ch: found,
                position: Self::LEN - 1,
            });
        }
        let expected = isin_check_digit(&code[..Self::LEN - 1]);
        if expected != found {
            return Err(CodeError::Checksum {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(Self(code))
    }

    /// Build an ISIN from its first eleven characters, computing the check digit.
    pub fn from_body(body: &str) -> Result<Self, CodeError> {
        let body = normalize(body, Self::LEN - 1)?;
        let check = isin_check_digit(&body);
        Self::parse(&format!("{body}{check}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ISO 3166 country prefix.
    pub fn country(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Isin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Isin {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Isin {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Isin> for String {
    fn from(value: Isin) -> Self {
        value.0
    }
}

impl AsRef<str> for Isin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Legal Entity Identifier of the fund or management company.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lei(String);

impl Lei {
    pub const LEN: usize = 20;

    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let code = normalize(raw, Self::LEN)?;
        // ISO 7064 MOD 97-10: the numeric expansion must leave remainder 1.
        if mod97(&code) != 1 {
            let body = &code[..Self::LEN - 2];
            let expected = 98 - mod97(&format!("{body}00"));
            return Err(CodeError::Checksum {
                expected: format!("{expected:02}"),
                found: code[Self::LEN - 2..].to_string(),
            });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Lei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Lei {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Lei> for String {
    fn from(value: Lei) -> Self {
        value.0
    }
}

/// Trim, upper-case, and check length and character set.
fn normalize(raw: &str, len: usize) -> Result<String, CodeError> {
    let code = raw.trim().to_ascii_uppercase();
    if let Some((position, ch)) = code
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_alphanumeric())
    {
        return Err(CodeError::Character { ch, position });
    }
    if code.len() != len {
        return Err(CodeError::Length {
            expected: len,
            actual: code.len(),
        });
    }
    Ok(code)
}

/// Luhn check digit over the letter-expanded ISIN body (A=10 .. Z=35).
fn isin_check_digit(body: &str) -> char {
    let digits: Vec<u32> = body
        .chars()
        .flat_map(|c| {
            let value = c.to_digit(36).unwrap_or(0);
            if value >= 10 {
                vec![value / 10, value % 10]
            } else {
                vec![value]
            }
        })
        .collect();

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    char::from_digit((10 - sum % 10) % 10, 10).unwrap_or('0')
}

/// Remainder of the letter-expanded code modulo 97, computed piecewise.
fn mod97(code: &str) -> u32 {
    code.chars().fold(0u32, |acc, c| {
        let value = c.to_digit(36).unwrap_or(0);
        if value >= 10 {
            (acc * 100 + value) % 97
        } else {
            (acc * 10 + value) % 97
        }
    })
}
