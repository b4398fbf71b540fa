//! Integration tests: decode the recorded share class response and
//! reconcile it against the bundled sample catalog.

use std::path::PathBuf;

use chrono::NaiveDate;
use fdpsync_core::catalog::Catalog;
use fdpsync_core::parse::{parse, ParseError, WarningKind};
use fdpsync_core::reconcile::{MatchStatus, Reconciler, RunMetadata, RunWarning};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn response() -> Vec<u8> {
    std::fs::read(fixture_dir().join("shareclass_response.xml")).unwrap()
}

#[test]
fn recorded_response_decodes_with_warnings() {
    let bytes = response();
    let parsed = parse(&bytes).unwrap().collect_all().unwrap();

    let codes: Vec<&str> = parsed.records.iter().map(|r| r.isin.as_str()).collect();
    assert_eq!(
        codes,
        [
            "AT0000A20FX4",
            "AT0000A0E9W5",
            "AT0000A1Z882",
            "LU0274208692",
            "AT0000A10J83",
            "AT0000A20FX4",
        ]
    );
    assert_eq!(parsed.content_date, NaiveDate::from_ymd_opt(2024, 5, 31));

    // Bad NAV, bad NavDate, bad check digit.
    assert_eq!(parsed.warnings.len(), 3);
    assert!(parsed
        .warnings
        .iter()
        .any(|w| matches!(&w.kind, WarningKind::InvalidIsin { value, .. } if value == "AT0000A20FX5")));
    assert_eq!(parsed.stats.share_classes, 7);
    assert_eq!(parsed.stats.records, 6);
    assert_eq!(parsed.stats.skipped, 1);
    assert_eq!(parsed.stats.invalid_fields, 2);

    let unknown = &parsed.records[3];
    assert_eq!(unknown.name.as_deref(), Some("World Equity <Index> Fund"));
    assert_eq!(unknown.nav, Some(-0.5));
    assert_eq!(unknown.nav_date, None);

    let no_timestamp = &parsed.records[2];
    assert_eq!(
        no_timestamp.source_timestamp,
        NaiveDate::from_ymd_opt(2024, 6, 3).and_then(|d| d.and_hms_opt(7, 30, 0))
    );
}

#[test]
fn parsing_twice_gives_the_same_records() {
    let bytes = response();
    let first: Vec<_> = parse(&bytes).unwrap().map(Result::unwrap).collect();
    let second: Vec<_> = parse(&bytes).unwrap().map(Result::unwrap).collect();
    assert_eq!(first, second);
}

#[test]
fn warnings_accumulate_lazily() {
    let bytes = response();
    let mut records = parse(&bytes).unwrap();
    assert!(records.warnings().is_empty());

    records.next().unwrap().unwrap();
    assert!(records.warnings().is_empty());
    records.next().unwrap().unwrap();
    assert_eq!(records.warnings().len(), 1);
    assert_eq!(records.stats().records, 2);
}

#[test]
fn truncated_response_is_malformed() {
    let bytes = response();
    let cut = &bytes[..bytes.len() / 2];
    let last = parse(cut).unwrap().last().unwrap();
    assert!(matches!(last, Err(ParseError::MalformedResponse { .. })));
}

#[test]
fn end_to_end_reconciliation() {
    let catalog = Catalog::load(fixture_dir().join("isinlei_sample.csv")).unwrap();
    let bytes = response();
    let parsed = parse(&bytes).unwrap().collect_all().unwrap();

    let mut reconciler = Reconciler::new(&catalog);
    reconciler.absorb(0, parsed.records);
    let report = reconciler.finish(RunMetadata::new(catalog.digest(), None));

    let statuses: Vec<(&str, MatchStatus)> = report
        .entries
        .iter()
        .map(|e| (e.isin.as_str(), e.status))
        .collect();
    assert_eq!(
        statuses,
        [
            ("AT0000A20FX4", MatchStatus::Matched),
            ("AT0000A0E9W5", MatchStatus::Matched),
            ("AT0000A1Z882", MatchStatus::Matched),
            ("AT0000785407", MatchStatus::MissingRemoteData),
            ("AT0000A10J83", MatchStatus::Matched),
            ("AT0000A2B4T3", MatchStatus::MissingRemoteData),
            ("LU0274208692", MatchStatus::UnknownIdentifier),
        ]
    );

    let first = report.entries[0].instrument.as_ref().unwrap();
    assert_eq!(first.nav, Some(123.45));
    assert!(matches!(
        report.warnings.as_slice(),
        [RunWarning::DuplicateRemoteRecord { batch: 0, isin }] if isin.as_str() == "AT0000A20FX4"
    ));

    let counts = report.counts();
    assert_eq!(counts.matched, 4);
    assert_eq!(counts.missing_remote_data, 2);
    assert_eq!(counts.unknown_identifier, 1);
    assert_eq!(counts.total(), catalog.len() + 1);
}
