//! Report Writer: one xlsx workbook per run, replaced atomically.
//!
//! The workbook is rendered completely in memory, written to a hidden
//! sibling `.<name>.tmp`, synced, and renamed over the destination. An
//! existing destination is never touched unless the rename succeeds.

pub mod layout;
pub mod xlsx;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use fdpsync_core::reconcile::RunReport;

#[derive(Debug, Error)]
pub enum ReportWriteError {
    #[error("cannot render workbook: {0}")]
    Render(#[from] rust_xlsxwriter::XlsxError),

    #[error("invalid report destination {}: {reason}", path.display())]
    InvalidDestination { path: PathBuf, reason: String },

    #[error("cannot write report to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Render `report` and atomically replace `destination` with it.
pub fn write_report(report: &RunReport, destination: &Path) -> Result<(), ReportWriteError> {
    let bytes = xlsx::render(report)?;
    persist(&bytes, destination)?;
    info!(
        event = "report.written",
        path = %destination.display(),
        rows = report.entries.len(),
        bytes = bytes.len(),
        "workbook written"
    );
    Ok(())
}

/// Sibling temporary path used while writing `destination`.
pub fn temp_path(destination: &Path) -> Result<PathBuf, ReportWriteError> {
    let name = destination
        .file_name()
        .ok_or_else(|| ReportWriteError::InvalidDestination {
            path: destination.to_path_buf(),
            reason: "no file name".into(),
        })?;
    Ok(destination.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}

fn persist(bytes: &[u8], destination: &Path) -> Result<(), ReportWriteError> {
    let tmp = temp_path(destination)?;
    let result = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, destination));
    if let Err(source) = result {
        // Clean up temp file; the destination is still the previous version.
        let _ = fs::remove_file(&tmp);
        return Err(ReportWriteError::Io {
            path: destination.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
