//! Workbook rendering with `rust_xlsxwriter`. Produces bytes, never touches disk.

use rust_xlsxwriter::{Color, ColNum, Format, FormatBorder, RowNum, Workbook, Worksheet, XlsxError};

use super::layout::{self, Cell, Highlight, COLUMNS};
use fdpsync_core::reconcile::RunReport;

const MISSING_FILL: u32 = 0xFFC7CE;
const UNKNOWN_FILL: u32 = 0xFFEB9C;
const HEADER_FILL: u32 = 0xD9E1F2;

/// Longest string Excel accepts in a cell, in characters.
const MAX_CELL_CHARS: usize = 32_767;

/// `s` cut to [`MAX_CELL_CHARS`] on a character boundary.
fn cell_text(s: &str) -> &str {
    s.char_indices()
        .nth(MAX_CELL_CHARS)
        .map_or(s, |(end, _)| &s[..end])
}

/// Cell formats for one row style.
struct RowFormats {
    text: Format,
    number: Format,
    date: Format,
    datetime: Format,
}

impl RowFormats {
    fn new(fill: Option<u32>) -> Self {
        let base = match fill {
            Some(rgb) => Format::new().set_background_color(Color::RGB(rgb)),
            None => Format::new(),
        };
        Self {
            number: base.clone().set_num_format("#,##0.00####"),
            date: base.clone().set_num_format("yyyy-mm-dd"),
            datetime: base.clone().set_num_format("yyyy-mm-dd hh:mm:ss"),
            text: base,
        }
    }

    fn write(
        &self,
        sheet: &mut Worksheet,
        row: RowNum,
        col: ColNum,
        cell: &Cell<'_>,
    ) -> Result<(), XlsxError> {
        match cell {
            Cell::Text(s) => sheet.write_string_with_format(row, col, cell_text(s), &self.text)?,
            Cell::Number(n) => sheet.write_number_with_format(row, col, *n, &self.number)?,
            Cell::Date(d) => sheet.write_datetime_with_format(row, col, d, &self.date)?,
            Cell::DateTime(t) => sheet.write_datetime_with_format(row, col, t, &self.datetime)?,
            Cell::Empty => sheet.write_blank(row, col, &self.text)?,
        };
        Ok(())
    }
}

/// Render the whole report to an in-memory `.xlsx`.
pub fn render(report: &RunReport) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(layout::RECONCILIATION_SHEET)?;
    write_entries(sheet, report)?;

    let summary = workbook.add_worksheet();
    summary.set_name(layout::SUMMARY_SHEET)?;
    write_summary(summary, report)?;

    workbook.save_to_buffer()
}

fn write_entries(sheet: &mut Worksheet, report: &RunReport) -> Result<(), XlsxError> {
    let header = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_border_bottom(FormatBorder::Thin);
    for (col, column) in COLUMNS.iter().enumerate() {
        let col = col as ColNum;
        sheet.write_string_with_format(0, col, column.title, &header)?;
        sheet.set_column_width(col, column.width)?;
    }

    let plain = RowFormats::new(None);
    let missing = RowFormats::new(Some(MISSING_FILL));
    let unknown = RowFormats::new(Some(UNKNOWN_FILL));

    for (i, entry) in report.entries.iter().enumerate() {
        let row = i as RowNum + 1;
        let formats = match layout::highlight(entry.status) {
            None => &plain,
            Some(Highlight::Missing) => &missing,
            Some(Highlight::Unknown) => &unknown,
        };
        for (col, cell) in layout::entry_cells(entry).iter().enumerate() {
            formats.write(sheet, row, col as ColNum, cell)?;
        }
    }

    let last_col = (COLUMNS.len() - 1) as ColNum;
    sheet.set_freeze_panes(1, 0)?;
    sheet.autofilter(0, 0, report.entries.len() as RowNum, last_col)?;
    Ok(())
}

fn write_summary(sheet: &mut Worksheet, report: &RunReport) -> Result<(), XlsxError> {
    let label = Format::new().set_bold();
    let values = RowFormats::new(None);
    sheet.set_column_width(0, 28)?;
    sheet.set_column_width(1, 70)?;

    let mut row: RowNum = 0;
    for (name, value) in layout::summary_rows(report) {
        sheet.write_string_with_format(row, 0, name, &label)?;
        values.write(sheet, row, 1, &value)?;
        row += 1;
    }

    if !report.failures.is_empty() {
        row += 1;
        sheet.write_string_with_format(row, 0, "Failed batches", &label)?;
        for failure in &report.failures {
            sheet.write_string(row, 1, cell_text(&failure.to_string()))?;
            row += 1;
        }
    }

    if !report.warnings.is_empty() {
        row += 1;
        sheet.write_string_with_format(row, 0, "Warnings", &label)?;
        for warning in &report.warnings {
            sheet.write_string(row, 1, cell_text(&warning.to_string()))?;
            row += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdpsync_core::catalog::Catalog;
    use fdpsync_core::domain::{IdentifierRecord, InstrumentRecord, Isin};
    use fdpsync_core::reconcile::reconcile;

    #[test]
    fn renders_a_zip_container() {
        let isin = Isin::parse("AT0000A20FX4").unwrap();
        let catalog = Catalog::from_records(vec![IdentifierRecord::new(isin, "Fund")]).unwrap();
        let report = reconcile(&catalog, Vec::new());
        let bytes = render(&report).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn oversized_text_is_cut_to_the_cell_limit() {
        let long = "é".repeat(MAX_CELL_CHARS + 10);
        let cut = cell_text(&long);
        assert_eq!(cut.chars().count(), MAX_CELL_CHARS);
        assert_eq!(cell_text("short"), "short");
    }

    #[test]
    fn renders_a_remote_name_longer_than_a_cell_holds() {
        let isin = Isin::parse("AT0000A20FX4").unwrap();
        let catalog =
            Catalog::from_records(vec![IdentifierRecord::new(isin.clone(), "Fund")]).unwrap();
        let record = InstrumentRecord {
            name: Some("N".repeat(40_000)),
            ..InstrumentRecord::bare(isin)
        };
        let bytes = render(&reconcile(&catalog, vec![record])).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn renders_an_empty_report() {
        let catalog = Catalog::from_records(Vec::new()).unwrap();
        let bytes = render(&reconcile(&catalog, Vec::new())).unwrap();
        assert!(!bytes.is_empty());
    }
}
