//! Render a dataset into a downloadable artifact.
//!
//! `Csv` is quoted per RFC 4180 and round-trips. `Tsv` and `Spreadsheet`
//! write raw tab-joined values: an embedded tab or newline in a cell shifts
//! columns for whoever parses it. `Document` is a printable HTML page with
//! every cell escaped by the template engine.

use askama::Template;
use chrono::{DateTime, Datelike, FixedOffset};
use serde::Serialize;

use super::{DateRange, ReportDataset, ReportFormat, ReportType};
use crate::error::{ReportError, Result};

/// Title block information for rendered reports.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub organization: String,
    pub report_type: ReportType,
    pub title: String,
    pub generated_at: DateTime<FixedOffset>,
    pub date_range: Option<DateRange>,
}

/// A rendered report ready to hand to a browser or notifier.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
    pub row_count: usize,
}

#[derive(Template)]
#[template(path = "report.html")]
struct DocumentTemplate<'a> {
    organization: &'a str,
    title: &'a str,
    generated_at: String,
    date_range: String,
    columns: &'a [String],
    rows: Vec<Vec<String>>,
    year: i32,
}

pub fn render(dataset: &ReportDataset, format: ReportFormat, meta: &DocumentMeta) -> Result<Artifact> {
    let bytes = match format {
        ReportFormat::Csv => render_csv(dataset)?,
        ReportFormat::Tsv | ReportFormat::Spreadsheet => render_delimited(dataset, '\t'),
        ReportFormat::Document => render_document(dataset, meta)?,
    };

    Ok(Artifact {
        bytes,
        filename: filename(meta, format),
        content_type: format.content_type(),
        row_count: dataset.len(),
    })
}

pub fn filename(meta: &DocumentMeta, format: ReportFormat) -> String {
    format!(
        "{}_{}.{}",
        meta.report_type,
        meta.generated_at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

fn render_csv(dataset: &ReportDataset) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer
        .write_record(dataset.columns())
        .map_err(|e| ReportError::Render(format!("failed to write CSV header: {e}")))?;
    for row in dataset.text_rows() {
        writer
            .write_record(&row)
            .map_err(|e| ReportError::Render(format!("failed to write CSV row: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::Render(format!("failed to flush CSV: {e}")))
}

fn render_delimited(dataset: &ReportDataset, delimiter: char) -> Vec<u8> {
    let sep = delimiter.to_string();
    let mut out = dataset.columns().join(&sep);
    out.push('\n');
    for row in dataset.text_rows() {
        out.push_str(&row.join(&sep));
        out.push('\n');
    }
    out.into_bytes()
}

fn render_document(dataset: &ReportDataset, meta: &DocumentMeta) -> Result<Vec<u8>> {
    let template = DocumentTemplate {
        organization: &meta.organization,
        title: &meta.title,
        generated_at: meta.generated_at.format("%B %-d, %Y %H:%M").to_string(),
        date_range: meta.date_range.map(|r| r.to_string()).unwrap_or_default(),
        columns: dataset.columns(),
        rows: dataset.text_rows(),
        year: meta.generated_at.year(),
    };
    template
        .render()
        .map(String::into_bytes)
        .map_err(|e| ReportError::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Value;
    use chrono::TimeZone;

    fn meta(format_date_range: bool) -> DocumentMeta {
        let offset = FixedOffset::east_opt(0).unwrap();
        DocumentMeta {
            organization: "Grace Fellowship".into(),
            report_type: ReportType::VisitorList,
            title: "Visitor List".into(),
            generated_at: offset.with_ymd_and_hms(2024, 3, 1, 9, 30, 5).unwrap(),
            date_range: format_date_range.then(|| {
                DateRange::month_of(chrono::NaiveDate::from_ymd_opt(2024, 2, 10).unwrap())
            }),
        }
    }

    fn dataset() -> ReportDataset {
        ReportDataset::new(
            vec!["Name".into(), "Notes".into(), "Count".into()],
            vec![
                vec![Value::from("Okafor, Ada"), Value::from("said \"hi\"\nthen left"), Value::Integer(3)],
                vec![Value::from("<script>alert(1)</script>"), Value::Null, Value::Real(2.5)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_csv_round_trip() {
        let ds = dataset();
        let artifact = render(&ds, ReportFormat::Csv, &meta(false)).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(artifact.bytes.as_slice());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, ds.columns());

        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(rows, ds.text_rows());
    }

    #[test]
    fn test_tab_delimited_is_raw() {
        let ds = ReportDataset::new(
            vec!["A".into(), "B".into()],
            vec![vec![Value::from("x,y"), Value::from("<b>")]],
        )
        .unwrap();
        let artifact = render(&ds, ReportFormat::Tsv, &meta(false)).unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "A\tB\nx,y\t<b>\n");
        assert_eq!(artifact.filename, "visitor_list_20240301_093005.tsv");
    }

    #[test]
    fn test_spreadsheet_declares_excel_type() {
        let artifact = render(&dataset(), ReportFormat::Spreadsheet, &meta(false)).unwrap();
        assert_eq!(artifact.content_type, "application/vnd.ms-excel");
        assert!(artifact.filename.ends_with(".xls"));
        assert!(String::from_utf8(artifact.bytes).unwrap().starts_with("Name\tNotes\tCount\n"));
    }

    #[test]
    fn test_document_escapes_cells() {
        let artifact = render(&dataset(), ReportFormat::Document, &meta(true)).unwrap();
        let html = String::from_utf8(artifact.bytes).unwrap();
        assert!(html.contains("Grace Fellowship"));
        assert!(html.contains("Visitor List"));
        assert!(html.contains("March 1, 2024 09:30"));
        assert!(html.contains("2024-02-01 to 2024-02-29"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("2024 Grace Fellowship"));
        assert_eq!(artifact.row_count, 2);
    }

    #[test]
    fn test_document_without_range_omits_period() {
        let artifact = render(&dataset(), ReportFormat::Document, &meta(false)).unwrap();
        let html = String::from_utf8(artifact.bytes).unwrap();
        assert!(!html.contains("Period:"));
    }
}
