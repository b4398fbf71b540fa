//! Reconciliation Engine: join remote records onto the catalog.
//!
//! Entries come out in catalog order, followed by identifiers the catalog
//! does not know in the order they were first seen. Every catalog identifier
//! yields exactly one entry and no remote record is dropped: a repeated code
//! keeps its first record and leaves a `DuplicateRemoteRecord` warning.

pub mod report;

use std::collections::HashMap;
use tracing::debug;

use crate::catalog::Catalog;
use crate::domain::{InstrumentRecord, Isin};

pub use report::{
    BatchFailure, FailureStage, MatchStatus, ReconciledEntry, RunId, RunMetadata, RunReport,
    RunWarning, StatusCounts,
};

/// Reconcile one record sequence against `catalog`.
pub fn reconcile(
    catalog: &Catalog,
    records: impl IntoIterator<Item = InstrumentRecord>,
) -> RunReport {
    let mut reconciler = Reconciler::new(catalog);
    reconciler.absorb(0, records);
    reconciler.finish(RunMetadata::new(catalog.digest(), None))
}

/// Incremental reconciliation, one batch at a time.
///
/// Absorb batches in batch order to get a reproducible report.
pub struct Reconciler<'c> {
    catalog: &'c Catalog,
    attached: Vec<Option<InstrumentRecord>>,
    unknown: Vec<InstrumentRecord>,
    unknown_index: HashMap<Isin, usize>,
    warnings: Vec<RunWarning>,
    failures: Vec<BatchFailure>,
}

impl<'c> Reconciler<'c> {
    /// Start with every catalog entry unmatched.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self {
            catalog,
            attached: vec![None; catalog.len()],
            unknown: Vec::new(),
            unknown_index: HashMap::new(),
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// [`Reconciler::push`] every record of one batch.
    pub fn absorb(&mut self, batch: usize, records: impl IntoIterator<Item = InstrumentRecord>) {
        for record in records {
            self.push(batch, record);
        }
    }

    /// Attach one remote record to its catalog entry, or keep it as unknown.
    ///
    /// The first record seen for an ISIN wins. Later ones are dropped with a
    /// [`RunWarning::DuplicateRemoteRecord`].
    pub fn push(&mut self, batch: usize, record: InstrumentRecord) {
        let position = self.catalog.position(&record.isin);
        let fresh = match position {
            Some(p) => self.attached[p].is_none(),
            None => !self.unknown_index.contains_key(&record.isin),
        };
        if !fresh {
            debug!(isin = %record.isin, batch, "duplicate remote record ignored");
            self.warnings.push(RunWarning::DuplicateRemoteRecord {
                batch,
                isin: record.isin,
            });
            return;
        }
        match position {
            Some(p) => self.attached[p] = Some(record),
            None => {
                self.unknown_index
                    .insert(record.isin.clone(), self.unknown.len());
                self.unknown.push(record);
            }
        }
    }

    pub fn warn(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    pub fn fail_batch(&mut self, failure: BatchFailure) {
        self.failures.push(failure);
    }

    pub fn matched(&self) -> usize {
        self.attached.iter().filter(|a| a.is_some()).count()
    }

    /// Build the report: catalog entries in catalog order, then unknown
    /// identifiers in the order they arrived.
    pub fn finish(self, metadata: RunMetadata) -> RunReport {
        let mut entries = Vec::with_capacity(self.attached.len() + self.unknown.len());
        for (identifier, attached) in self.catalog.iter().zip(self.attached) {
            let status = if attached.is_some() {
                MatchStatus::Matched
            } else {
                MatchStatus::MissingRemoteData
            };
            entries.push(ReconciledEntry {
                isin: identifier.isin.clone(),
                identifier: Some(identifier.clone()),
                instrument: attached,
                status,
            });
        }
        entries.extend(self.unknown.into_iter().map(|record| ReconciledEntry {
            isin: record.isin.clone(),
            identifier: None,
            instrument: Some(record),
            status: MatchStatus::UnknownIdentifier,
        }));

        RunReport {
            entries,
            metadata,
            warnings: self.warnings,
            failures: self.failures,
        }
    }
}
