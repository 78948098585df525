//! Minimal .xlsx writer: one worksheet, a header row and typed data rows.

use crate::coerce::CellValue;
use crate::error::ExtractError;
use crate::spreadsheet::cell::to_serial;
use crate::spreadsheet::reference::index_to_reference;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use indexmap::IndexMap;
use quick_xml::escape::escape;
use std::io::Seek;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// cellXfs indexes written to styles.xml
const STYLE_DATE: usize = 1;
const STYLE_DATETIME: usize = 2;
const STYLE_TIME: usize = 3;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
    <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
    <Default Extension="xml" ContentType="application/xml"/>
    <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
    <Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
    <Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

const ROOT_RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
    <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;

const WORKBOOK_RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
    <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
    <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

/// Built-in formats 14 (date), 22 (date-time) and 21 (time)
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
    <fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>
    <fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
    <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
    <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
    <cellXfs count="4">
        <xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
        <xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
        <xf numFmtId="22" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
        <xf numFmtId="21" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
    </cellXfs>
</styleSheet>"#;

/// Writes one worksheet named `sheet_name` to `writer` and returns the writer.
pub(crate) fn write_workbook<W: Write + Seek>(
    writer: W,
    sheet_name: &str,
    columns: &[String],
    rows: &[IndexMap<String, CellValue>],
) -> Result<W, ExtractError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default();

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELATIONSHIPS.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(workbook_xml(sheet_name).as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(WORKBOOK_RELATIONSHIPS.as_bytes())?;

    zip.start_file("xl/styles.xml", options)?;
    zip.write_all(STYLES.as_bytes())?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(worksheet_xml(columns, rows).as_bytes())?;

    Ok(zip.finish()?)
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
    <sheets>
        <sheet name="{}" sheetId="1" r:id="rId1"/>
    </sheets>
</workbook>"#,
        escape(sheet_name)
    )
}

fn worksheet_xml(columns: &[String], rows: &[IndexMap<String, CellValue>]) -> String {
    let mut content = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
    <sheetData>"#,
    );

    content.push_str("\n        <row r=\"1\">");
    for (col, name) in columns.iter().enumerate() {
        push_string_cell(&mut content, 0, col, name);
    }
    content.push_str("</row>");

    for (index, record) in rows.iter().enumerate() {
        let row = index + 1;
        content.push_str(&format!("\n        <row r=\"{}\">", row + 1));
        for (col, name) in columns.iter().enumerate() {
            if let Some(value) = record.get(name) {
                push_cell(&mut content, row, col, value);
            }
        }
        content.push_str("</row>");
    }

    content.push_str("\n    </sheetData>\n</worksheet>");
    content
}

fn push_cell(content: &mut String, row: usize, col: usize, value: &CellValue) {
    let reference = index_to_reference(row, col);
    match value {
        CellValue::Null => (),
        CellValue::Bool(value) => {
            content.push_str(&format!("<c r=\"{}\" t=\"b\"><v>{}</v></c>", reference, u8::from(*value)));
        }
        CellValue::Int(value) => {
            content.push_str(&format!("<c r=\"{reference}\"><v>{value}</v></c>"));
        }
        CellValue::Float(value) if value.is_finite() => {
            content.push_str(&format!("<c r=\"{reference}\"><v>{value}</v></c>"));
        }
        CellValue::Float(value) => push_string_cell(content, row, col, &value.to_string()),
        CellValue::Date(text) => match date_serial(text) {
            Some((serial, style)) => {
                content.push_str(&format!("<c r=\"{reference}\" s=\"{style}\"><v>{serial}</v></c>"));
            }
            None => push_string_cell(content, row, col, text),
        },
        CellValue::String(text) => push_string_cell(content, row, col, text),
    }
}

fn push_string_cell(content: &mut String, row: usize, col: usize, text: &str) {
    let text: String = text
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r') || !c.is_control())
        .collect();
    content.push_str(&format!(
        "<c r=\"{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
        index_to_reference(row, col),
        escape(text.as_str())
    ));
}

/// Converts a rendered date back to a serial and picks the matching style
fn date_serial(text: &str) -> Option<(f64, usize)> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return to_serial(&datetime).map(|serial| (serial, STYLE_DATETIME));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return to_serial(&date.and_time(NaiveTime::MIN)).map(|serial| (serial, STYLE_DATE));
    }
    if let Ok(time) = NaiveTime::parse_from_str(text, "%H:%M:%S") {
        let seconds = time.signed_duration_since(NaiveTime::MIN).num_seconds();
        return Some((seconds as f64 / 86_400.0, STYLE_TIME));
    }
    None
}
