#![allow(dead_code)]

use sheet_extract::RowRecord;
use sheet_extract::SourceFile;
use std::io::Cursor;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><styleSheet><cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14"/></cellXfs></styleSheet>"#;

/// Builds small .xlsx packages cell by cell.
///
/// Cell text that parses as a number is written as a numeric cell, text starting with
/// `=` as a formula without cached value, text starting with `@` as a date-styled
/// serial, and everything else as an inline string. Empty text leaves the cell out.
#[derive(Default)]
pub struct XlsxFixture {
    sheets: Vec<(String, String)>,
    parts: Vec<(String, Vec<u8>)>,
}

impl XlsxFixture {
    pub fn new() -> XlsxFixture {
        XlsxFixture::default()
    }

    pub fn sheet(mut self, name: &str, rows: &[&[&str]]) -> XlsxFixture {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><worksheet><sheetData>"#);
        for (row, cells) in rows.iter().enumerate() {
            if cells.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            xml.push_str(&format!(r#"<row r="{}">"#, row + 1));
            for (col, text) in cells.iter().enumerate() {
                let reference = format!("{}{}", column_name(col), row + 1);
                if text.is_empty() {
                    continue;
                } else if let Some(formula) = text.strip_prefix('=') {
                    xml.push_str(&format!(r#"<c r="{reference}"><f>{}</f></c>"#, escape(formula)));
                } else if let Some(serial) = text.strip_prefix('@') {
                    xml.push_str(&format!(r#"<c r="{reference}" s="1"><v>{serial}</v></c>"#));
                } else if text.parse::<f64>().is_ok() {
                    xml.push_str(&format!(r#"<c r="{reference}"><v>{text}</v></c>"#));
                } else {
                    xml.push_str(&format!(r#"<c r="{reference}" t="inlineStr"><is><t>{}</t></is></c>"#, escape(text)));
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        self.sheets.push((name.to_owned(), xml));
        self
    }

    /// Adds a part, replacing any generated part with the same path.
    pub fn part(mut self, path: &str, content: &[u8]) -> XlsxFixture {
        self.parts.push((path.to_owned(), content.to_vec()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut generated: Vec<(String, Vec<u8>)> = vec![
            ("[Content_Types].xml".to_owned(), CONTENT_TYPES.as_bytes().to_vec()),
            ("xl/workbook.xml".to_owned(), self.workbook_xml().into_bytes()),
            ("xl/_rels/workbook.xml.rels".to_owned(), self.relationships_xml().into_bytes()),
            ("xl/styles.xml".to_owned(), STYLES.as_bytes().to_vec()),
        ];
        for (index, (_, xml)) in self.sheets.iter().enumerate() {
            generated.push((format!("xl/worksheets/sheet{}.xml", index + 1), xml.as_bytes().to_vec()));
        }
        generated.retain(|(path, _)| !self.parts.iter().any(|(part, _)| part == path));
        generated.extend(self.parts.iter().cloned());

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (path, content) in generated {
            writer.start_file(path, options).unwrap();
            writer.write_all(&content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Writes the package to `directory/file_name` and describes it.
    pub fn write(&self, directory: &Path, file_name: &str) -> SourceFile {
        let path = directory.join(file_name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        SourceFile::from_path(path).unwrap()
    }

    pub fn workbook_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
        );
        for (index, (name, _)) in self.sheets.iter().enumerate() {
            xml.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(name),
                index + 1,
                index + 1
            ));
        }
        xml.push_str("</sheets></workbook>");
        xml
    }

    fn relationships_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for index in 0..self.sheets.len() {
            xml.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                index + 1,
                index + 1
            ));
        }
        xml.push_str(r#"<Relationship Id="rIdStyles" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#);
        xml.push_str("</Relationships>");
        xml
    }
}

fn column_name(mut col: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// A pivot cache part that is not valid UTF-8
pub fn broken_pivot_cache() -> (&'static str, &'static [u8]) {
    (
        "xl/pivotCache/pivotCacheRecords1.xml",
        b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><pivotCacheRecords><r><s v=\"Caf\xE9\"/></r></pivotCacheRecords>",
    )
}

/// Records without their extraction timestamps, for comparisons across runs
pub fn rows(records: &[RowRecord]) -> Vec<(String, String, usize, Vec<(String, String)>)> {
    records
        .iter()
        .map(|record| {
            (
                record.file_name.clone(),
                record.sheet_name.clone(),
                record.row_number,
                record
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), format!("{value:?}")))
                    .collect(),
            )
        })
        .collect()
}

fn varint(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn biff12_record(kind: u16, body: &[u8], out: &mut Vec<u8>) {
    varint(kind as usize, out);
    varint(body.len(), out);
    out.extend_from_slice(body);
}

fn wide(text: &str) -> Vec<u8> {
    let mut bytes = (text.encode_utf16().count() as u32).to_le_bytes().to_vec();
    bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
    bytes
}

/// A binary workbook with one sheet "Scores": a Name/Score header and two rows of
/// inline text and RK integers.
pub fn xlsb_bytes() -> Vec<u8> {
    const ROW_HDR: u16 = 0;
    const CELL_RK: u16 = 2;
    const CELL_ST: u16 = 6;
    const END_BUNDLE_SHS: u16 = 144;
    const BEGIN_SHEET_DATA: u16 = 145;
    const END_SHEET_DATA: u16 = 146;
    const BUNDLE_SH: u16 = 156;

    let rels = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.bin"/></Relationships>"#;

    let mut workbook = Vec::new();
    let mut bundle = vec![0u8; 8];
    bundle.extend(wide("rId1"));
    bundle.extend(wide("Scores"));
    biff12_record(BUNDLE_SH, &bundle, &mut workbook);
    biff12_record(END_BUNDLE_SHS, &[], &mut workbook);

    let text = |col: u32, value: &str| {
        let mut body = col.to_le_bytes().to_vec();
        body.extend(0u32.to_le_bytes());
        body.extend(wide(value));
        body
    };
    let integer = |col: u32, value: u32| {
        let mut body = col.to_le_bytes().to_vec();
        body.extend(0u32.to_le_bytes());
        body.extend(((value << 2) | 0x02).to_le_bytes());
        body
    };
    let mut sheet = Vec::new();
    biff12_record(BEGIN_SHEET_DATA, &[], &mut sheet);
    biff12_record(ROW_HDR, &0u32.to_le_bytes(), &mut sheet);
    biff12_record(CELL_ST, &text(0, "Name"), &mut sheet);
    biff12_record(CELL_ST, &text(1, "Score"), &mut sheet);
    for (row, (name, score)) in [("Ada", 10), ("Bob", 7)].into_iter().enumerate() {
        biff12_record(ROW_HDR, &(row as u32 + 1).to_le_bytes(), &mut sheet);
        biff12_record(CELL_ST, &text(0, name), &mut sheet);
        biff12_record(CELL_RK, &integer(1, score), &mut sheet);
    }
    biff12_record(END_SHEET_DATA, &[], &mut sheet);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (path, content) in [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("xl/_rels/workbook.bin.rels", rels.as_bytes()),
        ("xl/workbook.bin", workbook.as_slice()),
        ("xl/worksheets/sheet1.bin", sheet.as_slice()),
    ] {
        writer.start_file(path, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Writes [`xlsb_bytes`] to `directory/file_name` and describes it.
pub fn write_xlsb(directory: &Path, file_name: &str) -> SourceFile {
    let path = directory.join(file_name);
    std::fs::write(&path, xlsb_bytes()).unwrap();
    SourceFile::from_path(path).unwrap()
}
