//! Run Report: reconciled entries plus run metadata.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

use crate::domain::{IdentifierRecord, InstrumentRecord, Isin};
use crate::parse::ParseWarning;

/// Outcome of matching one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchStatus {
    Matched,
    MissingRemoteData,
    UnknownIdentifier,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 3] = [
        Self::Matched,
        Self::MissingRemoteData,
        Self::UnknownIdentifier,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Matched => "Matched",
            Self::MissingRemoteData => "MissingRemoteData",
            Self::UnknownIdentifier => "UnknownIdentifier",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntry {
    pub isin: Isin,
    /// Absent for `UnknownIdentifier` entries.
    pub identifier: Option<IdentifierRecord>,
    pub instrument: Option<InstrumentRecord>,
    pub status: MatchStatus,
}

/// Number of report entries per [`MatchStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub matched: usize,
    pub missing_remote_data: usize,
    pub unknown_identifier: usize,
}

impl StatusCounts {
    pub fn get(&self, status: MatchStatus) -> usize {
        match status {
            MatchStatus::Matched => self.matched,
            MatchStatus::MissingRemoteData => self.missing_remote_data,
            MatchStatus::UnknownIdentifier => self.unknown_identifier,
        }
    }

    pub fn total(&self) -> usize {
        self.matched + self.missing_remote_data + self.unknown_identifier
    }

    fn bump(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Matched => self.matched += 1,
            MatchStatus::MissingRemoteData => self.missing_remote_data += 1,
            MatchStatus::UnknownIdentifier => self.unknown_identifier += 1,
        }
    }
}

/// Something worth telling the reader of the report that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    Parse { batch: usize, warning: ParseWarning },
    DuplicateRemoteRecord { batch: usize, isin: Isin },
    Archive { batch: usize, message: String },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { batch, warning } => write!(f, "batch {batch}: {warning}"),
            Self::DuplicateRemoteRecord { batch, isin } => {
                write!(f, "batch {batch}: duplicate remote record for {isin}, first kept")
            }
            Self::Archive { batch, message } => {
                write!(f, "batch {batch}: response not archived: {message}")
            }
        }
    }
}

/// Which step a batch failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStage {
    Fetch,
    Parse,
}

/// A batch that was given up on in a partial run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub stage: FailureStage,
    pub isins: Vec<Isin>,
    pub reason: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} ({} identifiers) failed to {}: {}",
            self.batch,
            self.isins.len(),
            match self.stage {
                FailureStage::Fetch => "fetch",
                FailureStage::Parse => "parse",
            },
            self.reason
        )
    }
}

/// Stable identifier of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(String);

impl RunId {
    /// BLAKE3 over the canonical JSON of what the run was asked to do.
    pub fn derive(
        catalog_digest: &str,
        content_date: Option<NaiveDate>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let canonical = serde_json::json!({
            "catalog_digest": catalog_digest,
            "content_date": content_date.map(|d| d.to_string()),
            "generated_at": generated_at.to_rfc3339(),
        });
        let hash = blake3::hash(canonical.to_string().as_bytes());
        Self(hash.to_hex()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub catalog_digest: String,
    /// Content date that was requested, if any.
    pub content_date: Option<NaiveDate>,
    /// Content date the service reported, if it differs from or fills in the request.
    pub reported_content_date: Option<NaiveDate>,
}

impl RunMetadata {
    pub fn new(catalog_digest: impl Into<String>, content_date: Option<NaiveDate>) -> Self {
        Self::at(catalog_digest, content_date, Utc::now())
    }

    pub fn at(
        catalog_digest: impl Into<String>,
        content_date: Option<NaiveDate>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let catalog_digest = catalog_digest.into();
        Self {
            run_id: RunId::derive(&catalog_digest, content_date, generated_at),
            generated_at,
            catalog_digest,
            content_date,
            reported_content_date: None,
        }
    }
}

/// Everything one run produced, ready for the Report Writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub entries: Vec<ReconciledEntry>,
    pub metadata: RunMetadata,
    pub warnings: Vec<RunWarning>,
    pub failures: Vec<BatchFailure>,
}

impl RunReport {
    pub fn counts(&self) -> StatusCounts {
        self.entries.iter().fold(StatusCounts::default(), |mut c, e| {
            c.bump(e.status);
            c
        })
    }

    /// True when some batches were given up on.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn entry(&self, isin: &Isin) -> Option<&ReconciledEntry> {
        self.entries.iter().find(|e| &e.isin == isin)
    }
}
