//! Raw response archive.
//!
//! Each batch response is kept as
//! `<YYYY_MM_DD_H_M_S>__<PROD|TEST>_<supplier>_<mode>_batch<N>.xml`, with
//! hour, minute and second unpadded. Archiving never fails a run; the
//! pipeline turns errors from here into warnings.

use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use fdpsync_core::remote::Environment;

#[derive(Debug, Error)]
#[error("cannot archive response to {}: {source}", path.display())]
pub struct ArchiveError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Archive directory plus the file name prefix shared by one run.
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    dir: PathBuf,
    prefix: String,
}

impl ResponseArchive {
    /// All files of one run share the run's start time.
    pub fn new(
        dir: impl Into<PathBuf>,
        environment: Environment,
        data_supplier: &str,
        started_at: NaiveDateTime,
    ) -> Self {
        let supplier = sanitize(data_supplier);
        let prefix = format!(
            "{}__{}_{}",
            started_at.format("%Y_%m_%d_%-H_%-M_%-S"),
            environment.label(),
            if supplier.is_empty() { "unknown".into() } else { supplier }
        );
        Self {
            dir: dir.into(),
            prefix,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, mode: &str, batch: usize) -> String {
        format!("{}_{}_batch{batch}.xml", self.prefix, sanitize(mode))
    }

    /// Write one raw response, creating the directory if needed.
    pub fn save(&self, mode: &str, batch: usize, body: &[u8]) -> Result<PathBuf, ArchiveError> {
        let path = self.dir.join(self.file_name(mode, batch));
        fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(&path, body))
            .map_err(|source| ArchiveError {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Keep names portable: anything but ASCII letters, digits, `-` and `_` becomes `_`.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
