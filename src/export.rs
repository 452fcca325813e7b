//! Row sequences rendered as JSON, CSV, Markdown or PDF.
//!
//! All formats share one column layout: the union of row keys in
//! first-seen order, with missing keys rendered as empty cells.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::row::{Row, column_union};

/// Longer Markdown cells are cut to this many characters, ellipsis included.
pub const MAX_CELL_CHARS: usize = 100;
/// Rows looked at when listing each column's value types.
const TYPE_SAMPLE_ROWS: usize = 10;

const PDF_LINES_PER_PAGE: usize = 52;
const PDF_LINE_CHARS: usize = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    Pdf,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(AppError::InvalidRequest(format!("unknown export format: {}", other))),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn file_name(&self, generated_at: DateTime<Utc>) -> String {
        format!("extracted-data-{}.{}", generated_at.format("%Y%m%d-%H%M%S"), self.extension())
    }

    pub fn render(&self, rows: &[Row], generated_at: DateTime<Utc>) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Json => to_json(rows).map(String::into_bytes),
            ExportFormat::Csv => to_csv(rows).map(String::into_bytes),
            ExportFormat::Markdown => Ok(to_markdown(rows, generated_at).into_bytes()),
            ExportFormat::Pdf => to_pdf(rows, generated_at),
        }
    }
}

pub fn to_json(rows: &[Row]) -> Result<String> {
    serde_json::to_string_pretty(rows).map_err(|e| AppError::ExportError(e.to_string()))
}

/// Every field quoted, quotes doubled. No rows gives an empty string.
pub fn to_csv(rows: &[Row]) -> Result<String> {
    if rows.is_empty() {
        return Ok(String::new());
    }
    let columns = column_union(rows);

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(&columns).map_err(export_error)?;
    for row in rows {
        writer
            .write_record(columns.iter().map(|column| cell_text(row.get(column))))
            .map_err(export_error)?;
    }

    let bytes = writer.into_inner().map_err(|e| AppError::ExportError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AppError::ExportError(e.to_string()))
}

pub fn to_markdown(rows: &[Row], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("# Extracted Data\n\n");
    out.push_str(&format!("Generated: {}\n\n", generated_at.to_rfc3339()));

    if rows.is_empty() {
        out.push_str("No data available.\n");
        return out;
    }
    let columns = column_union(rows);

    out.push_str(&table_line(columns.iter().map(|c| markdown_cell(c))));
    out.push_str(&table_line(columns.iter().map(|_| "---".to_string())));
    for row in rows {
        out.push_str(&table_line(
            columns.iter().map(|c| markdown_cell(&cell_text(row.get(c)))),
        ));
    }

    out.push_str("\n## Summary\n\n");
    out.push_str(&format!("- Total records: {}\n", rows.len()));
    out.push_str(&format!("- Columns: {}\n", columns.join(", ")));
    out.push_str("\n### Column types\n\n");
    for column in &columns {
        let types = sampled_types(rows, column);
        let listing = if types.is_empty() {
            "empty".to_string()
        } else {
            types.join(", ")
        };
        out.push_str(&format!("- `{}`: {}\n", column, listing));
    }
    out
}

/// A plain text dump: one block per row, paginated.
pub fn to_pdf(rows: &[Row], generated_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let lines = pdf_lines(rows, generated_at);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in lines.chunks(PDF_LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![40.into(), 800.into()]),
        ];
        for line in page {
            operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }.encode().map_err(export_error)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(export_error)?;
    Ok(buf)
}

fn pdf_lines(rows: &[Row], generated_at: DateTime<Utc>) -> Vec<String> {
    let mut lines = vec![
        "Extracted Data".to_string(),
        format!("Generated: {}", generated_at.to_rfc3339()),
        format!("Total records: {}", rows.len()),
        String::new(),
    ];
    if rows.is_empty() {
        lines.push("No data available.".to_string());
    }

    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("Record {}", i + 1));
        for key in row.keys() {
            let text = format!("  {}: {}", key, cell_text(row.get(key)));
            let mut text = pdf_safe(&text);
            if text.chars().count() > PDF_LINE_CHARS {
                text = format!("{}...", text.chars().take(PDF_LINE_CHARS - 3).collect::<String>());
            }
            lines.push(text);
        }
        lines.push(String::new());
    }
    lines
}

// Helvetica's built-in encoding only covers Latin text.
fn pdf_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn markdown_cell(text: &str) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    let cut = if flat.chars().count() > MAX_CELL_CHARS {
        format!("{}...", flat.chars().take(MAX_CELL_CHARS - 3).collect::<String>())
    } else {
        flat
    };
    cut.replace('|', "\\|")
}

fn table_line(cells: impl Iterator<Item = String>) -> String {
    let cells: Vec<String> = cells.collect();
    format!("| {} |\n", cells.join(" | "))
}

fn sampled_types(rows: &[Row], column: &str) -> Vec<&'static str> {
    let mut types = Vec::new();
    for row in rows.iter().take(TYPE_SAMPLE_ROWS) {
        let name = match row.get(column) {
            None | Some(Value::Null) => continue,
            Some(Value::String(_)) => "string",
            Some(Value::Number(_)) => "number",
            Some(Value::Bool(_)) => "boolean",
            Some(Value::Array(_)) => "array",
            Some(Value::Object(_)) => "object",
        };
        if !types.contains(&name) {
            types.push(name);
        }
    }
    types
}

fn export_error(e: impl std::fmt::Display) -> AppError {
    AppError::ExportError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> Vec<Row> {
        vec![
            Row::from_value(json!({"title": "She said \"hi\"", "count": 2})),
            Row::from_value(json!({"title": "Plain", "url": "https://a.test"})),
        ]
    }

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn csv_round_trips_embedded_quotes() {
        let rows = sample_rows();
        let csv_text = to_csv(&rows).unwrap();

        assert!(csv_text.starts_with("\"title\",\"count\",\"url\"\n"));
        assert!(csv_text.contains("\"She said \"\"hi\"\"\""));

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), ["title", "count", "url"]);

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&records[0][0], "She said \"hi\"");
        assert_eq!(&records[0][1], "2");
        assert_eq!(&records[0][2], "");
        assert_eq!(&records[1][2], "https://a.test");
    }

    #[test]
    fn csv_of_nothing_is_empty() {
        assert_eq!(to_csv(&[]).unwrap(), "");
    }

    #[test]
    fn markdown_table_truncates_and_escapes() {
        let long = "x".repeat(150);
        let rows = vec![Row::from_value(json!({"a": long, "b": "left|right"}))];
        let md = to_markdown(&rows, at());

        assert!(md.contains("| a | b |\n| --- | --- |\n"));
        assert!(md.contains(&format!("| {}... |", "x".repeat(MAX_CELL_CHARS - 3))));
        assert!(md.contains("left\\|right"));
        assert!(md.contains("- Total records: 1"));
        assert!(md.contains("- `a`: string"));
    }

    #[test]
    fn markdown_lists_mixed_column_types() {
        let rows = vec![
            Row::from_value(json!({"v": 1})),
            Row::from_value(json!({"v": "one"})),
            Row::from_value(json!({"w": true})),
        ];
        let md = to_markdown(&rows, at());
        assert!(md.contains("- `v`: number, string"));
        assert!(md.contains("- `w`: boolean"));
    }

    #[test]
    fn pdf_paginates_rows() {
        let rows: Vec<Row> = (0..40)
            .map(|i| Row::from_value(json!({"name": format!("Item {i}"), "note": "ünïcode"})))
            .collect();
        let bytes = to_pdf(&rows, at()).unwrap();

        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        // 4 header lines + 4 lines per row.
        let expected_pages = (4 + 40 * 4usize).div_ceil(PDF_LINES_PER_PAGE);
        assert_eq!(doc.get_pages().len(), expected_pages);
    }

    #[test]
    fn formats_parse_with_aliases() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert!(matches!("xlsx".parse::<ExportFormat>(), Err(AppError::InvalidRequest(_))));
        assert_eq!(ExportFormat::Csv.file_name(at()), "extracted-data-20240501-120000.csv");
    }

    #[test]
    fn json_export_keeps_field_order() {
        let json_text = to_json(&sample_rows()).unwrap();
        let first = json_text.find("\"title\"").unwrap();
        let second = json_text.find("\"count\"").unwrap();
        assert!(first < second);
    }
}
