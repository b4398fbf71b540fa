//! The locally bundled list of ISINs and fund metadata.
//!
//! The list is a `;`-delimited text file, one share class per line:
//!
//! ```text
//! ISIN;Name;ManagementCompany;OeNB_ID;LEI;LEIStatus;Wrapper;ISINStatus
//! ```
//!
//! Only ISIN and name are required. Loading is all-or-nothing: a single
//! malformed line or a duplicated ISIN rejects the whole file, since a
//! partially loaded catalog would corrupt reconciliation counts.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::{IdentifierRecord, Isin, Lei};

/// Errors raised while loading the identifier list.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("identifier list not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("cannot read identifier list {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode identifier list at line {line}: {source}")]
    Decode {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("malformed entry at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("duplicate identifier {code} at line {line} (first seen at line {first_line})")]
    DuplicateIdentifier { code: Isin, first_line: u64, line: u64 },
}

impl CatalogError {
    /// Duplicates are reported separately from every other load failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateIdentifier { .. })
    }
}

/// Read-only, indexed set of identifier records, in source order.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: Vec<IdentifierRecord>,
    index: HashMap<Isin, usize>,
    digest: String,
    source: Option<PathBuf>,
}

impl Catalog {
    /// Load the identifier list from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogError::Missing {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| CatalogError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog = Self::from_bytes(&bytes)?;
        catalog.source = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            records = catalog.len(),
            "identifier list loaded"
        );
        Ok(catalog)
    }

    /// Load the identifier list from any reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, CatalogError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| CatalogError::Unreadable {
                path: PathBuf::from("<reader>"),
                source,
            })?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let mut builder = CatalogBuilder::default();
        for (i, row) in reader.byte_records().enumerate() {
            let row = row.map_err(|source| CatalogError::Decode {
                line: source
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(i as u64 + 1),
                source,
            })?;
            let line = row.position().map(|p| p.line()).unwrap_or(i as u64 + 1);
            // Tolerate non-UTF-8 exports by replacing undecodable bytes.
            let fields: Vec<String> = row
                .iter()
                .map(|f| String::from_utf8_lossy(f).trim().to_string())
                .collect();

            if fields.iter().all(String::is_empty) {
                continue;
            }
            if builder.is_empty() && fields[0].eq_ignore_ascii_case("isin") {
                continue;
            }

            let record = parse_line(&fields, line)?;
            builder.push(record, line)?;
        }

        Ok(builder.finish(blake3::hash(bytes).to_hex().to_string()))
    }

    /// Build a catalog from records already in memory (tests, benchmarks).
    pub fn from_records(records: Vec<IdentifierRecord>) -> Result<Self, CatalogError> {
        let mut hasher = blake3::Hasher::new();
        let mut builder = CatalogBuilder::default();
        for (i, record) in records.into_iter().enumerate() {
            hasher.update(record.isin.as_str().as_bytes());
            hasher.update(b"\n");
            builder.push(record, i as u64 + 1)?;
        }
        Ok(builder.finish(hasher.finalize().to_hex().to_string()))
    }

    /// O(1) lookup by ISIN. Accepts un-normalized input.
    pub fn lookup(&self, code: &str) -> Option<&IdentifierRecord> {
        let isin = Isin::parse(code).ok()?;
        self.get(&isin)
    }

    /// Record for an already parsed ISIN.
    pub fn get(&self, isin: &Isin) -> Option<&IdentifierRecord> {
        self.index.get(isin).map(|&i| &self.records[i])
    }

    /// True when the catalog lists `isin`.
    pub fn contains(&self, isin: &Isin) -> bool {
        self.index.contains_key(isin)
    }

    /// Position of an ISIN in source order.
    pub fn position(&self, isin: &Isin) -> Option<usize> {
        self.index.get(isin).copied()
    }

    /// All records whose ISIN, LEI or OeNB id equals `id`.
    ///
    /// A fund (LEI / OeNB id) usually maps to several share classes.
    pub fn find_by_any_id(&self, id: &str) -> Vec<&IdentifierRecord> {
        let id = id.trim();
        self.records
            .iter()
            .filter(|r| {
                r.isin.as_str().eq_ignore_ascii_case(id)
                    || r.lei.as_ref().is_some_and(|l| l.as_str().eq_ignore_ascii_case(id))
                    || r.oenb_id.as_deref() == Some(id)
            })
            .collect()
    }

    /// Records in source order.
    pub fn iter(&self) -> impl Iterator<Item = &IdentifierRecord> {
        self.records.iter()
    }

    pub fn isins(&self) -> impl Iterator<Item = &Isin> {
        self.records.iter().map(|r| &r.isin)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// BLAKE3 digest of the source bytes, for run provenance.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[derive(Default)]
struct CatalogBuilder {
    records: Vec<IdentifierRecord>,
    index: HashMap<Isin, usize>,
    lines: Vec<u64>,
}

impl CatalogBuilder {
    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: IdentifierRecord, line: u64) -> Result<(), CatalogError> {
        if let Some(&existing) = self.index.get(&record.isin) {
            return Err(CatalogError::DuplicateIdentifier {
                code: record.isin,
                first_line: self.lines[existing],
                line,
            });
        }
        self.index.insert(record.isin.clone(), self.records.len());
        self.records.push(record);
        self.lines.push(line);
        Ok(())
    }

    fn finish(self, digest: String) -> Catalog {
        Catalog {
            records: self.records,
            index: self.index,
            digest,
            source: None,
        }
    }
}

fn parse_line(fields: &[String], line: u64) -> Result<IdentifierRecord, CatalogError> {
    let malformed = |reason: String| CatalogError::Malformed { line, reason };

    let isin = Isin::parse(&fields[0])
        .map_err(|e| malformed(format!("invalid ISIN '{}': {e}", fields[0])))?;

    let name = fields
        .get(1)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed(format!("missing name for {isin}")))?;

    let optional = |i: usize| fields.get(i).filter(|f| !f.is_empty()).cloned();

    let lei = optional(4)
        .map(|raw| Lei::parse(&raw).map_err(|e| malformed(format!("invalid LEI '{raw}': {e}"))))
        .transpose()?;

    Ok(IdentifierRecord {
        isin,
        name: name.clone(),
        category: optional(6),
        management_company: optional(2),
        oenb_id: optional(3),
        lei,
        lei_status: optional(5),
        isin_status: optional(7),
    })
}
