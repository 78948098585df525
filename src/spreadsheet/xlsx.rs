use crate::error::ExtractError;
use crate::helpers::reader::SourceReader;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::FileFormat;
use crate::spreadsheet::OpenOptions;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use zip::ZipArchive;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");
const TAG_FORMULA: QName = QName(b"f");

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELATIONSHIPS_PART: &str = "xl/_rels/workbook.xml.rels";
const STYLES_PART: &str = "xl/styles.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Office Open XML workbook (.xlsx)
pub(crate) struct XlsxSpreadsheet {
    zip: ZipArchive<SourceReader>,
    options: OpenOptions,
    number_formats: Vec<CellType>,
    shared_strings: Vec<String>,
    /// Worksheets as (name, zip path) pairs
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet {
    /// Loads the workbook catalogue, styles and shared strings. Worksheets are parsed
    /// lazily by [`Spreadsheet::read_sheet`].
    pub(crate) fn open(mut zip: ZipArchive<SourceReader>, options: OpenOptions) -> Result<XlsxSpreadsheet, ExtractError> {
        let (sheets, is_1904) = load_workbook(&mut zip, &options)?;
        if sheets.is_empty() {
            Err(SpreadsheetError::Empty(WORKBOOK_PART.to_owned()))?
        }
        let number_formats = load_number_formats(&mut zip, &options, is_1904)?;
        let shared_strings = load_shared_strings(&mut zip, &options)?;
        if options.mode.is_strict() {
            excel::validate_auxiliary_parts(&mut zip, &options.limits)?;
        }

        Ok(XlsxSpreadsheet {
            zip,
            options,
            number_formats,
            shared_strings,
            sheets,
        })
    }
}

impl Spreadsheet for XlsxSpreadsheet {
    fn format(&self) -> FileFormat {
        FileFormat::Xlsx
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, index: usize) -> Result<Sheet, ExtractError> {
        let (sheet_name, zip_path) = self.sheets
            .get(index)
            .ok_or_else(|| ExtractError::SheetNotFound(index.to_string()))?;
        let lossy = self.options.mode.is_lossy();
        let mut reader = self.zip
            .xml_reader(zip_path, &self.options.limits)?
            .ok_or_else(|| SpreadsheetError::MissingPart(zip_path.to_owned()))?;

        let mut sheet = Sheet::new(sheet_name);
        let mut row_count = 0usize;
        let mut col_count = 0usize;
        let mut row = 0usize;
        let mut col = 0usize;
        let mut kind = CellType::default();
        let mut is_shared = false;
        let mut has_value = false;
        let mut value = String::new();
        let mut formula = None::<String>;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_ROW => {
                if let Some(index) = event.parse_attribute_value::<usize>("r").ok().flatten() {
                    row_count = index.saturating_sub(1);
                }
                col_count = 0;
            }
            Event::End(event) if event.name() == TAG_ROW => {
                row_count += 1;
            }
            Event::Start(event) if event.name() == TAG_CELL => {
                (row, col) = event.get_attribute_value("r")?
                    .and_then(|reference| reference_to_index(&reference))
                    .unwrap_or((row_count, col_count));
                col_count = col + 1;
                value.clear();
                formula = None;
                is_shared = false;
                has_value = false;
                kind = match event.get_attribute_value("t")?.as_deref() {
                    Some("inlineStr") | Some("str") => CellType::Text,
                    Some("s") => {
                        is_shared = true;
                        CellType::Text
                    }
                    Some("d") => CellType::IsoDateTime,
                    Some("b") => CellType::Boolean,
                    Some("e") => CellType::Error,
                    _ => CellType::Number,
                };
                if kind == CellType::Number {
                    if let Some(style) = event.get_attribute_value("s")? {
                        if let Ok(style) = style.parse::<usize>() {
                            kind = self.number_formats.get(style).copied().unwrap_or(CellType::Number);
                        }
                    }
                }
            }
            Event::Start(event) if event.name() == TAG_INLINE_STRING => {
                value = read_string_value(&mut reader, TAG_INLINE_STRING, false, lossy)?;
            }
            Event::Start(event) if event.name() == TAG_VALUE => {
                value = read_string_value(&mut reader, TAG_VALUE, true, lossy)?;
                has_value = true;
            }
            Event::Start(event) if event.name() == TAG_FORMULA => {
                formula = Some(read_string_value(&mut reader, TAG_FORMULA, true, lossy)?);
            }
            Event::End(event) if event.name() == TAG_CELL => {
                if is_shared {
                    value = value.trim().parse::<usize>().ok()
                        .and_then(|index| self.shared_strings.get(index))
                        .cloned()
                        .unwrap_or_default();
                }
                if !value.is_empty() || formula.is_some() {
                    // an empty cached string result is still a result
                    let is_empty_string = has_value && formula.is_some() && kind == CellType::Text;
                    let kind = if value.is_empty() && !is_empty_string { CellType::Empty } else { kind };
                    sheet.push(Cell {
                        row,
                        col,
                        kind,
                        value: std::mem::take(&mut value),
                        formula: formula.take(),
                    });
                }
            }
        });
        sheet.finish();
        Ok(sheet)
    }
}

/// Reads worksheet names and paths plus the date system from `xl/workbook.xml`.
fn load_workbook(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<(Vec<(String, String)>, bool), ExtractError> {
    let relationships = load_relationships(zip, WORKBOOK_RELATIONSHIPS_PART, &options.limits)?;
    let mut reader = zip.xml_reader(WORKBOOK_PART, &options.limits)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_PART.to_owned()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                let value = if options.mode.is_lossy() {
                    Cow::Owned(String::from_utf8_lossy(&attribute.value).into_owned())
                } else {
                    attribute.get_value()?
                };
                if key.as_ref() == b"name" {
                    name = Some(value);
                } else if key.as_ref() == b"id" {
                    id = Some(value);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.into_owned(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value == "1" || value == "true")
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Lists worksheet names straight from `xl/workbook.xml`, decoding lossily and ignoring
/// every other part.
pub(crate) fn read_sheet_names(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<Vec<String>, ExtractError> {
    let mut reader = zip.xml_reader(WORKBOOK_PART, &options.limits)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_PART.to_owned()))?;
    let mut names = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            for result in event.attributes() {
                let attribute = result?;
                if attribute.key.local_name().as_ref() == b"name" {
                    names.push(String::from_utf8_lossy(&attribute.value).into_owned());
                }
            }
        }
    });
    Ok(names)
}

/// Maps every cell style index to a cell type using `xl/styles.xml`.
fn load_number_formats(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions, is_1904: bool) -> Result<Vec<CellType>, ExtractError> {
    let mut reader = match zip.xml_reader(STYLES_PART, &options.limits)? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = false,
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = false,
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?.unwrap_or(Cow::Borrowed("0"));
            format_indexes.push(id.to_string());
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

fn load_shared_strings(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<Vec<String>, ExtractError> {
    let lossy = options.mode.is_lossy();
    let mut shared_strings = Vec::<String>::new();
    let mut reader = match zip.xml_reader(SHARED_STRINGS_PART, &options.limits)? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false, lossy)?);
        }
    });
    Ok(shared_strings)
}

/// Collects the text of an element up to `end_tag`, skipping phonetic runs.
fn read_string_value<R: BufRead>(
    reader: &mut XmlReader<R>,
    end_tag: QName,
    is_text_content: bool,
    lossy: bool,
) -> Result<String, ExtractError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = is_text_content,
        Event::Text(event) if is_text => text.push_bytes_text(&event, lossy)?,
        Event::CData(event) if is_text => text.push_bytes_cdata(&event, lossy)?,
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::coerce;
    use crate::coerce::CellValue;
    use crate::config::ArchiveLimits;
    use crate::error::ErrorKind;
    use crate::spreadsheet::ParseMode;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const RELS: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;
    const WORKBOOK: &str = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    const STYLES: &str = r#"<styleSheet><numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy-mm-dd"/></numFmts><cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="164"/><xf numFmtId="22"/></cellXfs></styleSheet>"#;
    const SHARED: &str = r#"<sst><si><t>Name</t></si><si><r><t>Ada</t></r><rPh><t>ignored</t></rPh></si></sst>"#;
    const SHEET: &str = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>When</t></is></c><c r="C1" t="str"><v>Total</v></c></row>
        <row r="3"><c r="A3" t="s"><v>1</v></c><c r="B3" s="1"><v>45000</v></c><c r="C3"><f>SUM(1,2)</f><v>3</v></c><c r="D3" t="e"><v>#DIV/0!</v></c><c r="E3" t="b"><v>1</v></c><c r="F3" s="9"><v>2.5</v></c><c r="G3" t="str"><f>IF(1,"","x")</f><v></v></c><c r="H3"><f>A1</f></c></row>
    </sheetData></worksheet>"#;

    fn workbook(extra: &[(&str, &[u8])]) -> ZipArchive<SourceReader> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut parts: Vec<(&str, &[u8])> = vec![
            ("xl/_rels/workbook.xml.rels", RELS.as_bytes()),
            ("xl/workbook.xml", WORKBOOK.as_bytes()),
            ("xl/styles.xml", STYLES.as_bytes()),
            ("xl/sharedStrings.xml", SHARED.as_bytes()),
            ("xl/worksheets/sheet1.xml", SHEET.as_bytes()),
        ];
        parts.extend_from_slice(extra);
        for (name, content) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();
        ZipArchive::new(SourceReader::from_bytes(bytes)).unwrap()
    }

    fn options(mode: ParseMode) -> OpenOptions {
        OpenOptions { limits: ArchiveLimits::default(), mode }
    }

    #[test]
    fn reads_cells_with_types() {
        let mut spreadsheet = XlsxSpreadsheet::open(workbook(&[]), options(ParseMode::Strict)).unwrap();
        assert_eq!(spreadsheet.sheet_names(), vec!["Data"]);

        let sheet = spreadsheet.read_sheet(0).unwrap();
        assert_eq!(sheet.first_row(), Some(0));
        assert_eq!(sheet.last_row(), Some(2));

        let header = sheet.row(0).unwrap();
        let values: Vec<_> = header.cells().iter().map(|cell| cell.value()).collect();
        assert_eq!(values, vec!["Name", "When", "Total"]);

        let row = sheet.row(2).unwrap();
        assert_eq!(row.get(0).unwrap().value(), "Ada");
        assert_eq!(row.get(1).unwrap().kind(), CellType::NumberDate1900);
        assert_eq!(row.get(2).unwrap().formula(), Some("SUM(1,2)"));
        assert_eq!(row.get(2).unwrap().value(), "3");
        assert_eq!(row.get(3).unwrap().kind(), CellType::Error);
        assert_eq!(row.get(4).unwrap().kind(), CellType::Boolean);
        // style index past the end of cellXfs falls back to a plain number
        assert_eq!(row.get(5).unwrap().kind(), CellType::Number);
        // an empty cached string stays a string, a formula without a result does not
        assert_eq!(row.get(6).unwrap().kind(), CellType::Text);
        assert_eq!(row.get(6).unwrap().value(), "");
        assert_eq!(coerce(row.get(6)), CellValue::String(String::new()));
        assert_eq!(row.get(7).unwrap().kind(), CellType::Empty);
        assert_eq!(coerce(row.get(7)), CellValue::String("A1".to_owned()));
    }

    #[test]
    fn strict_mode_rejects_bad_pivot_cache() {
        let pivot: &[u8] = b"<pivotCacheRecords><r><s v=\"caf\xE9\"/></r></pivotCacheRecords>";
        let error = XlsxSpreadsheet::open(workbook(&[("xl/pivotCache/pivotCacheRecords1.xml", pivot)]), options(ParseMode::Strict))
            .err()
            .unwrap();
        assert_eq!(error.kind(), ErrorKind::InvalidEncoding);

        let spreadsheet = XlsxSpreadsheet::open(workbook(&[("xl/pivotCache/pivotCacheRecords1.xml", pivot)]), options(ParseMode::Tolerant));
        assert!(spreadsheet.is_ok());
    }

    #[test]
    fn sheet_names_only() {
        let mut zip = workbook(&[]);
        assert_eq!(read_sheet_names(&mut zip, &options(ParseMode::Tolerant)).unwrap(), vec!["Data"]);
    }
}
