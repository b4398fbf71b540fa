//! What goes in each workbook cell, independent of the xlsx encoding.

use chrono::{NaiveDate, NaiveDateTime};

use fdpsync_core::reconcile::{MatchStatus, ReconciledEntry, RunReport};

pub const RECONCILIATION_SHEET: &str = "Reconciliation";
pub const SUMMARY_SHEET: &str = "Run Summary";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub title: &'static str,
    pub width: f64,
}

pub const COLUMNS: [Column; 11] = [
    Column { title: "ISIN", width: 15.0 },
    Column { title: "Name", width: 40.0 },
    Column { title: "Category", width: 12.0 },
    Column { title: "Management Company", width: 28.0 },
    Column { title: "LEI", width: 23.0 },
    Column { title: "Remote Name", width: 40.0 },
    Column { title: "Currency", width: 10.0 },
    Column { title: "NAV", width: 14.0 },
    Column { title: "NAV Date", width: 12.0 },
    Column { title: "Source Timestamp", width: 20.0 },
    Column { title: "Status", width: 20.0 },
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell<'a> {
    Text(&'a str),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Empty,
}

impl<'a> Cell<'a> {
    fn text(value: Option<&'a str>) -> Self {
        value.map_or(Cell::Empty, Cell::Text)
    }
}

/// Cells of one reconciliation row, in [`COLUMNS`] order.
pub fn entry_cells(entry: &ReconciledEntry) -> [Cell<'_>; 11] {
    let id = entry.identifier.as_ref();
    let remote = entry.instrument.as_ref();
    [
        Cell::Text(entry.isin.as_str()),
        Cell::text(id.map(|i| i.display_name())),
        Cell::text(id.and_then(|i| i.category.as_deref())),
        Cell::text(id.and_then(|i| i.management_company.as_deref())),
        Cell::text(id.and_then(|i| i.lei.as_ref()).map(|l| l.as_str())),
        Cell::text(remote.and_then(|r| r.name.as_deref())),
        Cell::text(remote.and_then(|r| r.currency.as_deref())),
        remote.and_then(|r| r.nav).map_or(Cell::Empty, Cell::Number),
        remote.and_then(|r| r.nav_date).map_or(Cell::Empty, Cell::Date),
        remote
            .and_then(|r| r.source_timestamp)
            .map_or(Cell::Empty, Cell::DateTime),
        Cell::Text(entry.status.label()),
    ]
}

/// Row highlight for a status; `None` means no fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Missing,
    Unknown,
}

pub fn highlight(status: MatchStatus) -> Option<Highlight> {
    match status {
        MatchStatus::Matched => None,
        MatchStatus::MissingRemoteData => Some(Highlight::Missing),
        MatchStatus::UnknownIdentifier => Some(Highlight::Unknown),
    }
}

/// Label/value rows of the summary sheet.
pub fn summary_rows(report: &RunReport) -> Vec<(&'static str, Cell<'_>)> {
    let meta = &report.metadata;
    let counts = report.counts();
    let mut rows = vec![
        ("Run ID", Cell::Text(meta.run_id.as_str())),
        ("Generated (UTC)", Cell::DateTime(meta.generated_at.naive_utc())),
        (
            "Content date requested",
            meta.content_date.map_or(Cell::Text("service default"), Cell::Date),
        ),
        (
            "Content date reported",
            meta.reported_content_date.map_or(Cell::Empty, Cell::Date),
        ),
        ("Catalog digest (BLAKE3)", Cell::Text(&meta.catalog_digest)),
    ];
    for status in MatchStatus::ALL {
        rows.push((status.label(), Cell::Number(counts.get(status) as f64)));
    }
    rows.push(("Total", Cell::Number(counts.total() as f64)));
    rows.push((
        "Partial run",
        Cell::Text(if report.is_partial() { "yes" } else { "no" }),
    ));
    rows
}
