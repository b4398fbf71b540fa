//! Parse errors, per-record warnings and decode statistics.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::domain::CodeError;

/// A response that cannot be decoded at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed response at byte {position}: {reason}")]
    MalformedResponse { position: u64, reason: String },

    #[error("service returned error {code}: {message}")]
    ServiceError { code: String, message: String },
}

impl ParseError {
    pub(crate) fn malformed(position: u64, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            position,
            reason: reason.into(),
        }
    }
}

/// What went wrong with one record or field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningKind {
    MissingIsin,
    InvalidIsin { value: String, reason: String },
    UnexpectedStructure { element: String },
    UndecodableField { field: String, reason: String },
    InvalidField { field: String, value: String },
}

impl WarningKind {
    pub(crate) fn invalid_isin(value: &str, reason: &CodeError) -> Self {
        Self::InvalidIsin {
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the whole record was dropped, not just one field.
    pub fn skips_record(&self) -> bool {
        !matches!(self, Self::InvalidField { .. })
    }
}

/// A recoverable problem found while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// 1-based ordinal of the `ShareClass` element, 0 for document-level fields.
    pub record: usize,
    pub isin: Option<String>,
    pub kind: WarningKind,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.record == 0 {
            f.write_str("document: ")?;
        } else {
            write!(f, "record {}", self.record)?;
            if let Some(isin) = &self.isin {
                write!(f, " ({isin})")?;
            }
            f.write_str(": ")?;
        }
        match &self.kind {
            WarningKind::MissingIsin => f.write_str("missing ISIN, record skipped"),
            WarningKind::InvalidIsin { value, reason } => {
                write!(f, "invalid ISIN '{value}' ({reason}), record skipped")
            }
            WarningKind::UnexpectedStructure { element } => {
                write!(f, "unexpected structure in <{element}>, record skipped")
            }
            WarningKind::UndecodableField { field, reason } => {
                write!(f, "undecodable <{field}> ({reason}), record skipped")
            }
            WarningKind::InvalidField { field, value } => {
                write!(f, "unparseable {field} '{value}', left empty")
            }
        }
    }
}

/// Counters for what has been decoded so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub share_classes: usize,
    pub records: usize,
    pub skipped: usize,
    pub invalid_fields: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_display_names_the_record() {
        let w = ParseWarning {
            record: 3,
            isin: Some("AT0000A20FX4".into()),
            kind: WarningKind::InvalidField {
                field: "NAV".into(),
                value: "12,5".into(),
            },
        };
        assert_eq!(
            w.to_string(),
            "record 3 (AT0000A20FX4): unparseable NAV '12,5', left empty"
        );
        assert!(!w.kind.skips_record());
        assert!(WarningKind::MissingIsin.skips_record());
    }

    #[test]
    fn undecodable_field_skips_the_record() {
        let w = ParseWarning {
            record: 2,
            isin: Some("AT0000A0E9W5".into()),
            kind: WarningKind::UndecodableField {
                field: "Name".into(),
                reason: "unrecognized entity `bogus`".into(),
            },
        };
        assert!(w.kind.skips_record());
        assert_eq!(
            w.to_string(),
            "record 2 (AT0000A0E9W5): undecodable <Name> (unrecognized entity `bogus`), record skipped"
        );
    }
}
