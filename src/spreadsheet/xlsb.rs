use crate::error::ExtractError;
use crate::helpers::biff12::Biff12Reader;
use crate::helpers::reader::SourceReader;
use crate::helpers::zip::ZipHelper;
use crate::match_biff12_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::FileFormat;
use crate::spreadsheet::OpenOptions;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use std::io::BufRead;
use zip::ZipArchive;

// BIFF12 record types
const BRT_ROW_HDR: u16 = 0;
const BRT_CELL_RK: u16 = 2;
const BRT_CELL_ERROR: u16 = 3;
const BRT_CELL_BOOL: u16 = 4;
const BRT_CELL_REAL: u16 = 5;
const BRT_CELL_ST: u16 = 6;
const BRT_CELL_ISST: u16 = 7;
const BRT_FMLA_STRING: u16 = 8;
const BRT_FMLA_NUM: u16 = 9;
const BRT_FMLA_BOOL: u16 = 10;
const BRT_FMLA_ERROR: u16 = 11;
const BRT_SST_ITEM: u16 = 19;
const BRT_FRT_BEGIN: u16 = 35;
const BRT_FRT_END: u16 = 36;
const BRT_FMT: u16 = 44;
const BRT_XF: u16 = 47;
const BRT_CELL_R_STRING: u16 = 62;
const BRT_END_BUNDLE_SHS: u16 = 144;
const BRT_BEGIN_SHEET_DATA: u16 = 145;
const BRT_END_SHEET_DATA: u16 = 146;
const BRT_WB_PROP: u16 = 153;
const BRT_BUNDLE_SH: u16 = 156;
const BRT_BEGIN_SST: u16 = 159;
const BRT_BEGIN_FMTS: u16 = 615;
const BRT_BEGIN_CELL_XFS: u16 = 617;

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.bin";
const WORKBOOK_RELATIONSHIPS_PART: &str = "xl/_rels/workbook.bin.rels";
const STYLES_PART: &str = "xl/styles.bin";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.bin";

type CellKind = Either<CellType, usize>;

/// Excel binary workbook (.xlsb)
pub(crate) struct XlsbSpreadsheet {
    zip: ZipArchive<SourceReader>,
    options: OpenOptions,
    number_formats: Vec<CellType>,
    shared_strings: Vec<String>,
    sheets: Vec<(String, String)>,
}

impl XlsbSpreadsheet {
    pub(crate) fn open(mut zip: ZipArchive<SourceReader>, options: OpenOptions) -> Result<XlsbSpreadsheet, ExtractError> {
        let (sheets, is_1904) = load_workbook(&mut zip, &options)?;
        if sheets.is_empty() {
            Err(SpreadsheetError::Empty(WORKBOOK_PART.to_owned()))?
        }
        let number_formats = match load_number_formats(&mut zip, &options, is_1904) {
            Ok(number_formats) => number_formats,
            Err(error) if options.mode.is_lossy() => {
                log::warn!("Ignoring unreadable {STYLES_PART}: {error}");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        let shared_strings = load_shared_strings(&mut zip, &options)?;
        if options.mode.is_strict() {
            excel::validate_auxiliary_parts(&mut zip, &options.limits)?;
        }

        Ok(XlsbSpreadsheet {
            zip,
            options,
            number_formats,
            shared_strings,
            sheets,
        })
    }
}

impl Spreadsheet for XlsbSpreadsheet {
    fn format(&self) -> FileFormat {
        FileFormat::Xlsb
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, index: usize) -> Result<Sheet, ExtractError> {
        let (sheet_name, zip_path) = self.sheets
            .get(index)
            .ok_or_else(|| ExtractError::SheetNotFound(index.to_string()))?;
        let mut reader = self.zip
            .biff_reader(zip_path, &self.options.limits)?
            .ok_or_else(|| SpreadsheetError::MissingPart(zip_path.to_owned()))?;
        reader.find(BRT_BEGIN_SHEET_DATA)?;

        let mut sheet = Sheet::new(sheet_name);
        let mut row = 0usize;
        while let Some(tag) = reader.next()? {
            match tag {
                BRT_END_SHEET_DATA => break,
                BRT_ROW_HDR => row = reader.get_usize(0)?,
                BRT_CELL_RK
                | BRT_CELL_BOOL | BRT_FMLA_BOOL
                | BRT_CELL_REAL | BRT_FMLA_NUM
                | BRT_CELL_ST | BRT_FMLA_STRING
                | BRT_CELL_R_STRING
                | BRT_CELL_ISST
                | BRT_CELL_ERROR | BRT_FMLA_ERROR => {
                    let col = reader.get_usize(0)?;
                    let (kind, value) = match tag {
                        BRT_CELL_BOOL | BRT_FMLA_BOOL => read_bool_cell(&reader)?,
                        BRT_CELL_REAL | BRT_FMLA_NUM => read_real_cell(&reader)?,
                        BRT_CELL_ST | BRT_FMLA_STRING => read_st_cell(&reader)?,
                        BRT_CELL_R_STRING => read_rich_string_cell(&reader)?,
                        BRT_CELL_ISST => {
                            let index = reader.get_usize(8)?;
                            let value = self.shared_strings.get(index).cloned().unwrap_or_default();
                            (Either::Left(CellType::Text), value)
                        }
                        BRT_CELL_ERROR | BRT_FMLA_ERROR => read_error_cell(&reader)?,
                        _ => read_rk_cell(&reader)?,
                    };
                    let kind = resolve(&self.number_formats, kind);
                    if matches!(tag, BRT_FMLA_STRING | BRT_FMLA_NUM | BRT_FMLA_BOOL | BRT_FMLA_ERROR) {
                        sheet.push(Cell::new(row, col, kind, value).with_formula(""));
                    } else if !value.is_empty() {
                        sheet.push(Cell::new(row, col, kind, value));
                    }
                }
                _ => (),
            }
        }
        sheet.finish();
        Ok(sheet)
    }
}

fn resolve(number_formats: &[CellType], kind: CellKind) -> CellType {
    match kind {
        Either::Left(kind) => kind,
        Either::Right(index) => number_formats.get(index).copied().unwrap_or(CellType::Number),
    }
}

fn load_workbook(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<(Vec<(String, String)>, bool), ExtractError> {
    let relationships = load_relationships(zip, WORKBOOK_RELATIONSHIPS_PART, &options.limits)?;
    let mut reader = zip.biff_reader(WORKBOOK_PART, &options.limits)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_PART.to_owned()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_biff12_record!(reader => {
        BRT_END_BUNDLE_SHS => break,
        BRT_BUNDLE_SH => {
            let (id, index) = reader.get_str_and_bound(8)?;
            if let Some(zip_path) = relationships.get(id.as_ref()) {
                let sheet_name = reader.get_str(index)?;
                sheets.push((sheet_name.to_string(), zip_path.to_owned()));
            }
        }
        BRT_WB_PROP => is_1904 = (reader.get_u8(0)? & 0x1) != 0,
    });
    Ok((sheets, is_1904))
}

/// Lists sheet names from `xl/workbook.bin` alone, ignoring relationships.
pub(crate) fn read_sheet_names(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<Vec<String>, ExtractError> {
    let mut reader = zip.biff_reader(WORKBOOK_PART, &options.limits)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_PART.to_owned()))?;
    let mut names = Vec::new();
    match_biff12_record!(reader => {
        BRT_END_BUNDLE_SHS => break,
        BRT_BUNDLE_SH => {
            let (_, index) = reader.get_str_and_bound(8)?;
            names.push(reader.get_str(index)?.to_string());
        }
    });
    Ok(names)
}

fn load_number_formats(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions, is_1904: bool) -> Result<Vec<CellType>, ExtractError> {
    let mut reader = match zip.biff_reader(STYLES_PART, &options.limits)? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats: HashMap<String, CellType> = HashMap::new();
    let mut format_indexes: Vec<String> = Vec::new();
    match_biff12_record!(reader => {
        BRT_BEGIN_FMTS => {
            for _ in 0..reader.get_usize(0)? {
                reader.find(BRT_FMT)?;
                let id = reader.get_u16(0)?;
                let format = reader.get_str(2)?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        BRT_BEGIN_CELL_XFS => {
            for _ in 0..reader.get_usize(0)? {
                reader.find(BRT_XF)?;
                let id = reader.get_u16(2)?;
                format_indexes.push(id.to_string());
            }
            break;
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

fn load_shared_strings(zip: &mut ZipArchive<SourceReader>, options: &OpenOptions) -> Result<Vec<String>, ExtractError> {
    let mut shared_strings = Vec::<String>::new();
    let mut reader = match zip.biff_reader(SHARED_STRINGS_PART, &options.limits)? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };

    reader.find(BRT_BEGIN_SST)?;
    let count = reader.get_usize(4)?;
    for _ in 0..count {
        reader.find_with(BRT_SST_ITEM, &[(BRT_FRT_BEGIN, BRT_FRT_END)])?;
        shared_strings.push(reader.get_str(1)?.to_string());
    }
    Ok(shared_strings)
}

fn read_bool_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let value = if reader.get_u8(8)? != 0 { "1" } else { "0" };
    Ok((Either::Left(CellType::Boolean), value.to_owned()))
}

fn read_real_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let index = reader.get_style(4)?;
    let value = reader.get_f64(8)?.to_string();
    Ok((Either::Right(index), value))
}

fn read_st_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let value = reader.get_str(8)?.to_string();
    Ok((Either::Left(CellType::Text), value))
}

/// Rich strings carry a flags byte before the text
fn read_rich_string_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let value = reader.get_str(8 + 1)?.to_string();
    Ok((Either::Left(CellType::Text), value))
}

fn read_error_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let value = to_error_value(reader.get_u8(8)?).to_owned();
    Ok((Either::Left(CellType::Error), value))
}

fn read_rk_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<(CellKind, String), ExtractError> {
    let index = reader.get_style(4)?;
    let value = reader.get_rk(8)?;
    Ok((Either::Right(index), value.to_string()))
}
