//! Streaming decoder for `FundsXML4` share class responses.
//!
//! Records are produced one `ShareClass` element at a time, straight from the
//! borrowed input. Per-record problems become warnings; structural problems
//! end the iteration with a single `Err`.

use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::iter::FusedIterator;
use tracing::warn;

use super::coerce;
use super::warning::{ParseError, ParseStats, ParseWarning, WarningKind};
use crate::domain::{InstrumentRecord, Isin};

const ROOT: &[u8] = b"FundsXML4";
const ERROR_ROOT: &[u8] = b"Error";
const CONTROL_DATA: &[u8] = b"ControlData";
const SHARE_CLASSES: &[u8] = b"ShareClasses";
const SHARE_CLASS: &[u8] = b"ShareClass";

/// Start decoding a response body.
///
/// Fails up front on an empty payload, a document whose root is not
/// `FundsXML4`, or the service's `<Error>` envelope. Everything after the
/// root element is decoded lazily by the returned iterator; call `parse`
/// again on the same bytes to start over.
pub fn parse(bytes: &[u8]) -> Result<InstrumentRecords<'_>, ParseError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::malformed(0, "empty response"));
    }

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                return match e.local_name().as_ref() {
                    ROOT => Ok(InstrumentRecords::new(reader, Cursor::Root)),
                    ERROR_ROOT => Err(read_service_error(&mut reader)),
                    other => Err(unexpected_root(&reader, other)),
                };
            }
            Ok(Event::Empty(e)) => {
                return match e.local_name().as_ref() {
                    ROOT => Ok(InstrumentRecords::new(reader, Cursor::Finished)),
                    ERROR_ROOT => Err(ParseError::ServiceError {
                        code: String::new(),
                        message: String::new(),
                    }),
                    other => Err(unexpected_root(&reader, other)),
                };
            }
            Ok(Event::End(_)) => {
                return Err(malformed(&reader, "closing tag before any element"));
            }
            Ok(Event::Eof) => return Err(malformed(&reader, "no root element")),
            Ok(_) => continue,
            Err(e) => return Err(malformed(&reader, e.to_string())),
        }
    }
}

/// Where the reader sits in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Root,
    ShareClasses,
    Finished,
}

/// Lazy iterator over the share classes of one response.
pub struct InstrumentRecords<'a> {
    reader: Reader<&'a [u8]>,
    cursor: Cursor,
    document_generated: Option<NaiveDateTime>,
    content_date: Option<NaiveDate>,
    warnings: Vec<ParseWarning>,
    stats: ParseStats,
}

impl<'a> InstrumentRecords<'a> {
    fn new(reader: Reader<&'a [u8]>, cursor: Cursor) -> Self {
        Self {
            reader,
            cursor,
            document_generated: None,
            content_date: None,
            warnings: Vec::new(),
            stats: ParseStats::default(),
        }
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Counters for what has been decoded so far.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// `ControlData/ContentDate`, once the control block has been read.
    pub fn content_date(&self) -> Option<NaiveDate> {
        self.content_date
    }

    pub fn document_generated(&self) -> Option<NaiveDateTime> {
        self.document_generated
    }

    /// Drain the iterator, keeping the warnings and stats.
    pub fn collect_all(mut self) -> Result<ParsedResponse, ParseError> {
        let records = self.by_ref().collect::<Result<Vec<_>, _>>()?;
        Ok(ParsedResponse {
            records,
            warnings: self.warnings,
            stats: self.stats,
            content_date: self.content_date,
        })
    }

    fn advance(&mut self) -> Result<Option<InstrumentRecord>, ParseError> {
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| malformed(&self.reader, e.to_string()))?;

            match (self.cursor, event) {
                (Cursor::Finished, _) => return Ok(None),
                (_, Event::Eof) => return Err(malformed(&self.reader, "truncated document")),

                (Cursor::Root, Event::Start(e)) => match e.local_name().as_ref() {
                    CONTROL_DATA => self.read_control_data()?,
                    SHARE_CLASSES => self.cursor = Cursor::ShareClasses,
                    _ => skip(&mut self.reader, &e)?,
                },
                (Cursor::Root, Event::End(_)) => {
                    self.cursor = Cursor::Finished;
                    return Ok(None);
                }

                (Cursor::ShareClasses, Event::Start(e)) => {
                    if e.local_name().as_ref() == SHARE_CLASS {
                        if let Some(record) = self.read_share_class()? {
                            return Ok(Some(record));
                        }
                    } else {
                        let element = name_of(&e);
                        skip(&mut self.reader, &e)?;
                        self.stats.share_classes += 1;
                        self.skip_record(None, WarningKind::UnexpectedStructure { element });
                    }
                }
                (Cursor::ShareClasses, Event::Empty(e)) => {
                    self.stats.share_classes += 1;
                    let kind = if e.local_name().as_ref() == SHARE_CLASS {
                        WarningKind::MissingIsin
                    } else {
                        WarningKind::UnexpectedStructure {
                            element: name_of(&e),
                        }
                    };
                    self.skip_record(None, kind);
                }
                (Cursor::ShareClasses, Event::End(_)) => self.cursor = Cursor::Root,

                _ => continue,
            }
        }
    }

    fn read_control_data(&mut self) -> Result<(), ParseError> {
        loop {
            match self
                .reader
                .read_event()
                .map_err(|e| malformed(&self.reader, e.to_string()))?
            {
                Event::Start(e) => {
                    let field = name_of(&e);
                    let text = match read_text(&mut self.reader)? {
                        FieldText::Text(text) => text,
                        FieldText::Nested => continue,
                        FieldText::Undecodable(reason) => {
                            self.stats.invalid_fields += 1;
                            self.push_warning(ParseWarning {
                                record: 0,
                                isin: None,
                                kind: WarningKind::UndecodableField { field, reason },
                            });
                            continue;
                        }
                    };
                    match field.as_str() {
                        "DocumentGenerated" => {
                            self.document_generated = coerce::timestamp(&text);
                            if self.document_generated.is_none() {
                                self.field_warning(0, None, field, text);
                            }
                        }
                        "ContentDate" => {
                            self.content_date = coerce::date(&text);
                            if self.content_date.is_none() {
                                self.field_warning(0, None, field, text);
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(malformed(&self.reader, "truncated document")),
                _ => {}
            }
        }
    }

    /// Read one `ShareClass` element. `None` means it was skipped with a warning.
    fn read_share_class(&mut self) -> Result<Option<InstrumentRecord>, ParseError> {
        self.stats.share_classes += 1;
        let ordinal = self.stats.share_classes;
        let mut fields = RawFields::default();

        loop {
            match self
                .reader
                .read_event()
                .map_err(|e| malformed(&self.reader, e.to_string()))?
            {
                Event::Start(e) => match read_text(&mut self.reader)? {
                    FieldText::Text(text) => fields.set(&name_of(&e), text),
                    FieldText::Nested => {
                        fields.nested.get_or_insert_with(|| name_of(&e));
                    }
                    FieldText::Undecodable(reason) => {
                        fields.undecodable.get_or_insert_with(|| (name_of(&e), reason));
                    }
                },
                Event::End(_) => break,
                Event::Eof => return Err(malformed(&self.reader, "truncated document")),
                _ => {}
            }
        }

        let isin_text = fields.isin.take().filter(|s| !s.is_empty());
        if let Some(element) = fields.nested.take() {
            self.skip_record(isin_text, WarningKind::UnexpectedStructure { element });
            return Ok(None);
        }
        if let Some((field, reason)) = fields.undecodable.take() {
            self.skip_record(isin_text, WarningKind::UndecodableField { field, reason });
            return Ok(None);
        }
        let Some(isin_text) = isin_text else {
            self.skip_record(None, WarningKind::MissingIsin);
            return Ok(None);
        };
        let isin = match Isin::parse(&isin_text) {
            Ok(isin) => isin,
            Err(reason) => {
                let kind = WarningKind::invalid_isin(&isin_text, &reason);
                self.skip_record(Some(isin_text), kind);
                return Ok(None);
            }
        };

        let record = InstrumentRecord {
            name: fields.name.filter(|s| !s.is_empty()),
            currency: self.coerce(ordinal, &isin, "Currency", fields.currency, coerce::currency),
            nav: self.coerce(ordinal, &isin, "NAV", fields.nav, coerce::nav),
            nav_date: self.coerce(ordinal, &isin, "NavDate", fields.nav_date, coerce::date),
            status: fields.status.filter(|s| !s.is_empty()),
            source_timestamp: self
                .coerce(ordinal, &isin, "Timestamp", fields.timestamp, coerce::timestamp)
                .or(self.document_generated),
            isin,
        };
        self.stats.records += 1;
        Ok(Some(record))
    }

    fn coerce<T>(
        &mut self,
        ordinal: usize,
        isin: &Isin,
        field: &str,
        raw: Option<String>,
        convert: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let raw = raw.filter(|s| !s.is_empty())?;
        let value = convert(&raw);
        if value.is_none() {
            self.field_warning(ordinal, Some(isin.to_string()), field.to_string(), raw);
        }
        value
    }

    fn field_warning(&mut self, record: usize, isin: Option<String>, field: String, value: String) {
        self.stats.invalid_fields += 1;
        self.push_warning(ParseWarning {
            record,
            isin,
            kind: WarningKind::InvalidField { field, value },
        });
    }

    fn skip_record(&mut self, isin: Option<String>, kind: WarningKind) {
        self.stats.skipped += 1;
        self.push_warning(ParseWarning {
            record: self.stats.share_classes,
            isin,
            kind,
        });
    }

    fn push_warning(&mut self, warning: ParseWarning) {
        warn!(event = "parse.warning", %warning, "response warning");
        self.warnings.push(warning);
    }
}

impl Iterator for InstrumentRecords<'_> {
    type Item = Result<InstrumentRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == Cursor::Finished {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.cursor = Cursor::Finished;
                None
            }
            Err(e) => {
                self.cursor = Cursor::Finished;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for InstrumentRecords<'_> {}

/// A fully decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub records: Vec<InstrumentRecord>,
    pub warnings: Vec<ParseWarning>,
    pub stats: ParseStats,
    pub content_date: Option<NaiveDate>,
}

#[derive(Default)]
struct RawFields {
    isin: Option<String>,
    name: Option<String>,
    currency: Option<String>,
    nav: Option<String>,
    nav_date: Option<String>,
    status: Option<String>,
    timestamp: Option<String>,
    nested: Option<String>,
    undecodable: Option<(String, String)>,
}

impl RawFields {
    fn set(&mut self, field: &str, text: String) {
        let slot = match field {
            "ISIN" => &mut self.isin,
            "Name" => &mut self.name,
            "Currency" => &mut self.currency,
            "NAV" => &mut self.nav,
            "NavDate" => &mut self.nav_date,
            "Status" => &mut self.status,
            "Timestamp" => &mut self.timestamp,
            _ => return,
        };
        slot.get_or_insert(text);
    }
}

/// Content of one field element.
enum FieldText {
    Text(String),
    /// The element has child elements.
    Nested,
    /// Bad entity reference or invalid UTF-8; the reason is kept.
    Undecodable(String),
}

/// Read a field element's content up to its end tag.
///
/// Whatever the outcome the reader is left after the element's end tag, so
/// content problems stay local to the record. Only reader syntax errors are
/// returned as `Err`.
fn read_text(reader: &mut Reader<&[u8]>) -> Result<FieldText, ParseError> {
    let mut text = String::new();
    let mut nested = false;
    let mut undecodable = None;
    loop {
        match reader
            .read_event()
            .map_err(|e| malformed(reader, e.to_string()))?
        {
            Event::Text(t) => match t.unescape() {
                Ok(unescaped) => text.push_str(&unescaped),
                Err(e) => {
                    undecodable.get_or_insert_with(|| e.to_string());
                }
            },
            Event::CData(c) => match std::str::from_utf8(&c) {
                Ok(raw) => text.push_str(raw),
                Err(e) => {
                    undecodable.get_or_insert_with(|| e.to_string());
                }
            },
            Event::Start(child) => {
                nested = true;
                skip(reader, &child)?;
            }
            Event::Empty(_) => nested = true,
            Event::End(_) => break,
            Event::Eof => return Err(malformed(reader, "truncated document")),
            _ => {}
        }
    }
    Ok(match (nested, undecodable) {
        (true, _) => FieldText::Nested,
        (false, Some(reason)) => FieldText::Undecodable(reason),
        (false, None) => FieldText::Text(text.trim().to_string()),
    })
}

fn skip(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<(), ParseError> {
    reader
        .read_to_end(start.name())
        .map(|_| ())
        .map_err(|e| malformed(reader, e.to_string()))
}

fn read_service_error(reader: &mut Reader<&[u8]>) -> ParseError {
    let mut code = String::new();
    let mut message = String::new();
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => return malformed(reader, e.to_string()),
        };
        match event {
            Event::Start(e) => {
                let field = name_of(&e);
                match read_text(reader) {
                    Ok(FieldText::Text(text)) if field == "Code" => code = text,
                    Ok(FieldText::Text(text)) if field == "Message" => message = text,
                    Ok(_) => {}
                    Err(err) => return err,
                }
            }
            Event::End(_) => return ParseError::ServiceError { code, message },
            Event::Eof => return malformed(reader, "truncated error envelope"),
            _ => {}
        }
    }
}

fn name_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn unexpected_root(reader: &Reader<&[u8]>, name: &[u8]) -> ParseError {
    malformed(
        reader,
        format!(
            "unexpected root element <{}>, expected <FundsXML4>",
            String::from_utf8_lossy(name)
        ),
    )
}

fn malformed(reader: &Reader<&[u8]>, reason: impl Into<String>) -> ParseError {
    ParseError::malformed(reader.buffer_position(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <FundsXML4><ControlData><DocumentGenerated>2024-06-03T07:30:00</DocumentGenerated>\
             <ContentDate>2024-05-31</ContentDate></ControlData>\
             <ShareClasses>{body}</ShareClasses></FundsXML4>"
        )
    }

    #[test]
    fn decodes_a_share_class() {
        let xml = doc(
            "<ShareClass><ISIN>AT0000A20FX4</ISIN><Name>Rent &amp; Co</Name>\
             <Currency>EUR</Currency><NAV>123.45</NAV><NavDate>2024-05-31</NavDate>\
             <Status>active</Status><Timestamp>2024-06-01T08:00:00</Timestamp></ShareClass>",
        );
        let mut records = parse(xml.as_bytes()).unwrap();
        let record = records.next().unwrap().unwrap();
        assert_eq!(record.isin.as_str(), "AT0000A20FX4");
        assert_eq!(record.name.as_deref(), Some("Rent & Co"));
        assert_eq!(record.nav, Some(123.45));
        assert_eq!(
            record.source_timestamp.map(|t| t.to_string()).as_deref(),
            Some("2024-06-01 08:00:00")
        );
        assert!(records.next().is_none());
        assert!(records.next().is_none());
        assert_eq!(records.content_date(), NaiveDate::from_ymd_opt(2024, 5, 31));
        assert!(records.warnings().is_empty());
    }

    #[test]
    fn missing_timestamp_falls_back_to_document_time() {
        let xml = doc("<ShareClass><ISIN>US0378331005</ISIN></ShareClass>");
        let record = parse(xml.as_bytes()).unwrap().next().unwrap().unwrap();
        assert_eq!(
            record.source_timestamp.map(|t| t.to_string()).as_deref(),
            Some("2024-06-03 07:30:00")
        );
    }

    #[test]
    fn bad_fields_warn_and_stay_empty() {
        let xml = doc(
            "<ShareClass><ISIN>AT0000A20FX4</ISIN><NAV>12,5</NAV>\
             <Currency>eur</Currency></ShareClass>",
        );
        let mut records = parse(xml.as_bytes()).unwrap();
        let record = records.next().unwrap().unwrap();
        assert_eq!(record.nav, None);
        assert_eq!(record.currency, None);
        assert_eq!(records.warnings().len(), 2);
        assert_eq!(records.stats().invalid_fields, 2);
    }

    #[test]
    fn skipped_records_do_not_stop_iteration() {
        let xml = doc(
            "<ShareClass><Name>no code</Name></ShareClass>\
             <ShareClass><ISIN>AT0000A20FX5</ISIN></ShareClass>\
             <ShareClass><ISIN>DE0005140008</ISIN><Name><b>x</b></Name></ShareClass>\
             <ShareClass><ISIN>US0378331005</ISIN></ShareClass>",
        );
        let parsed = parse(xml.as_bytes()).unwrap().collect_all().unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].isin.as_str(), "US0378331005");
        let kinds: Vec<_> = parsed.warnings.iter().map(|w| &w.kind).collect();
        assert!(matches!(kinds[0], WarningKind::MissingIsin));
        assert!(matches!(kinds[1], WarningKind::InvalidIsin { .. }));
        assert!(matches!(kinds[2], WarningKind::UnexpectedStructure { element } if element == "Name"));
        assert_eq!(parsed.stats.share_classes, 4);
        assert_eq!(parsed.stats.skipped, 3);
    }

    #[test]
    fn bad_entity_skips_only_its_record() {
        let xml = doc(
            "<ShareClass><ISIN>AT0000A20FX4</ISIN><Name>Alpen Rent</Name></ShareClass>\
             <ShareClass><ISIN>AT0000A0E9W5</ISIN><Name>Rent &bogus; Co</Name></ShareClass>\
             <ShareClass><ISIN>US0378331005</ISIN><Name>Apple</Name></ShareClass>",
        );
        let parsed = parse(xml.as_bytes()).unwrap().collect_all().unwrap();
        let codes: Vec<_> = parsed.records.iter().map(|r| r.isin.as_str()).collect();
        assert_eq!(codes, ["AT0000A20FX4", "US0378331005"]);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].record, 2);
        assert_eq!(parsed.warnings[0].isin.as_deref(), Some("AT0000A0E9W5"));
        assert!(matches!(
            &parsed.warnings[0].kind,
            WarningKind::UndecodableField { field, .. } if field == "Name"
        ));
        assert_eq!(parsed.stats.skipped, 1);
    }

    #[test]
    fn invalid_utf8_skips_only_its_record() {
        let mut xml = doc(
            "<ShareClass><ISIN>AT0000A20FX4</ISIN><Name>NAME</Name></ShareClass>\
             <ShareClass><ISIN>US0378331005</ISIN></ShareClass>",
        )
        .into_bytes();
        let at = xml.windows(4).position(|w| w == b"NAME").unwrap();
        xml[at..at + 2].copy_from_slice(&[0xC3, 0x28]);
        let parsed = parse(&xml).unwrap().collect_all().unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].isin.as_str(), "US0378331005");
        assert!(matches!(
            parsed.warnings[0].kind,
            WarningKind::UndecodableField { .. }
        ));
    }

    #[test]
    fn structural_failures() {
        let empty = parse(b"  \n").err().unwrap();
        assert!(matches!(empty, ParseError::MalformedResponse { position: 0, .. }));

        let wrong_root = parse(b"<html><body/></html>").err().unwrap();
        assert!(matches!(wrong_root, ParseError::MalformedResponse { .. }));

        let truncated = doc("<ShareClass><ISIN>US0378331005</ISIN></ShareClass>");
        let cut = &truncated.as_bytes()[..truncated.len() - 20];
        let items: Vec<_> = parse(cut).unwrap().collect();
        assert!(items[0].is_ok());
        assert!(matches!(items.last(), Some(Err(ParseError::MalformedResponse { .. }))));
    }

    #[test]
    fn service_error_envelope() {
        let err = parse(b"<Error><Code>AUTH</Code><Message>bad login</Message></Error>")
            .err()
            .unwrap();
        assert_eq!(
            err,
            ParseError::ServiceError {
                code: "AUTH".into(),
                message: "bad login".into()
            }
        );
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert_eq!(parse(b"<FundsXML4/>").unwrap().count(), 0);
        assert_eq!(parse(doc("").as_bytes()).unwrap().count(), 0);
    }
}
