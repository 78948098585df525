use crate::error::ExtractError;
use crate::error::ResultOptionChain;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::helpers::reader::SourceReader;
use crate::match_biff8_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel::load_number_formats;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::FileFormat;
use crate::spreadsheet::OpenOptions;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use thiserror::Error;

// BIFF8 record types
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const CODE_PAGE: u16 = 66;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const XF: u16 = 224;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const STRING: u16 = 519;
const ARRAY: u16 = 545;
const TABLE: u16 = 566;
const RK: u16 = 638;
const FORMAT: u16 = 1054;
const SHR_FMLA: u16 = 1212;
const BOF: u16 = 2057;

/// Sheet type of a worksheet in BOUNDSHEET8
const WORKSHEET: u8 = 0;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Invalid code page '{0}'")]
    CodePage(u16),
}

/// Either a resolved cell type or an XF index still to be mapped through the number formats
type CellKind = Either<CellType, usize>;

/// Excel 97-2003 workbook (.xls)
pub(crate) struct XlsSpreadsheet {
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: Vec<CellType>,
    /// Worksheets with the stream offset of their BOF record
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    /// Reads the workbook globals substream. The compound file is fully read into memory,
    /// so `source` is released on return.
    pub(crate) fn open(mut source: SourceReader, options: OpenOptions) -> Result<XlsSpreadsheet, ExtractError> {
        let mut reader = open_workbook_stream(&mut source)?;
        drop(source);

        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut format_indexes: Vec<String> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS if reader.read_u16()? != 0 => Err(SpreadsheetError::PasswordProtected("FILEPASS".to_owned()))?,
            DATE1904 if reader.read_u16()? == 1 => is_1904 = true,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                match codepage::to_encoding(code_page) {
                    Some(encoding) => reader.encoding = encoding,
                    None if options.mode.is_lossy() => {
                        log::debug!("Unknown code page {code_page}, keeping {}", reader.encoding.name());
                    }
                    None => Err(XlsError::CodePage(code_page))?,
                }
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_xl_unicode_string()?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
            XF => {
                reader.skip(2)?;
                let id = reader.read_u16()?;
                format_indexes.push(id.to_string());
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                if let Some(sheet) = read_bound_sheet(&mut reader)? {
                    sheets.push(sheet);
                }
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::Empty("Workbook".to_owned()))?
        }

        let number_formats = load_number_formats(format_indexes, custom_formats, is_1904);

        Ok(XlsSpreadsheet {
            reader,
            shared_strings,
            number_formats,
            sheets,
        })
    }

    fn resolve(&self, kind: CellKind) -> CellType {
        match kind {
            Either::Left(kind) => kind,
            Either::Right(index) => self.number_formats.get(index).copied().unwrap_or(CellType::Number),
        }
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn format(&self) -> FileFormat {
        FileFormat::Xls
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, index: usize) -> Result<Sheet, ExtractError> {
        let (sheet_name, pointer) = self.sheets
            .get(index)
            .cloned()
            .ok_or_else(|| ExtractError::SheetNotFound(index.to_string()))?;
        self.reader.goto(pointer);
        self.reader.next()?;

        let mut sheet = Sheet::new(&sheet_name);
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let col_lower_bound = self.reader.read_u16()? as usize;
                    let col_upper_bound = self.reader.get_u16_back(2)? as usize;
                    for col in col_lower_bound..=col_upper_bound {
                        let index = self.reader.read_u16()? as usize;
                        let value = self.reader.read_rk()?;
                        sheet.push(Cell::new(row, col, self.resolve(Either::Right(index)), value.to_string()));
                    }
                }
                BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let (kind, value) = match tag {
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => read_number_cell(&mut self.reader)?,
                        RK => read_rk_cell(&mut self.reader)?,
                        LABEL_SST => {
                            let index = read_label_sst_index(&mut self.reader)?;
                            let value = self.shared_strings.get(index).cloned().unwrap_or_default();
                            (Either::Left(CellType::Text), value)
                        }
                        LABEL => read_label_cell(&mut self.reader)?,
                        _ => {
                            let (kind, value) = read_formula_cell(&mut self.reader)?;
                            let cell = Cell::new(row, col, self.resolve(kind), value).with_formula("");
                            sheet.push(cell);
                            continue;
                        }
                    };
                    if !value.is_empty() {
                        sheet.push(Cell::new(row, col, self.resolve(kind), value));
                    }
                }
                _ => (),
            }
        }
        sheet.finish();
        Ok(sheet)
    }
}

/// Opens the compound file and returns a reader over its workbook stream
fn open_workbook_stream(source: &mut SourceReader) -> Result<Biff8Reader, ExtractError> {
    let cfb = Cfb::new(source)?;
    if cfb.exists("EncryptedPackage") {
        Err(SpreadsheetError::PasswordProtected("EncryptedPackage".to_owned()))?
    }
    let reader = cfb.read("Workbook")
        .ok_none_else(|| cfb.read("Book"))?
        .map(Biff8Reader::new)
        .ok_or_else(|| SpreadsheetError::MissingPart("Workbook".to_owned()))?;
    Ok(reader)
}

/// Lists worksheet names from the BOUNDSHEET8 records without reading anything else.
pub(crate) fn read_sheet_names(source: &mut SourceReader) -> Result<Vec<String>, ExtractError> {
    let mut reader = open_workbook_stream(source)?;
    let mut names = Vec::new();
    match_biff8_record!(reader => {
        EOF => break,
        CODE_PAGE => {
            if let Some(encoding) = codepage::to_encoding(reader.read_u16()?) {
                reader.encoding = encoding;
            }
        }
        BOUND_SHEET8 => {
            if let Some((name, _)) = read_bound_sheet(&mut reader)? {
                names.push(name);
            }
        }
    });
    Ok(names)
}

/// Reads a BOUNDSHEET8 record, skipping chart, macro and module sheets
fn read_bound_sheet(reader: &mut Biff8Reader) -> Result<Option<(String, usize)>, ExtractError> {
    let pointer = reader.read_usize()?;
    let _visibility = reader.read_u8()?;
    let sheet_type = reader.read_u8()?;
    let name = reader.read_short_xl_unicode_string()?;
    Ok((sheet_type == WORKSHEET).then_some((name, pointer)))
}

fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, ExtractError> {
    let mut shared_strings: Vec<String> = Vec::new();
    reader.skip(4)?;
    let count = reader.read_usize()?;
    for _ in 0..count {
        let string = reader.read_xl_unicode_rich_extended_string()?;
        shared_strings.push(string);
    }
    Ok(shared_strings)
}

fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<(CellKind, String), ExtractError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let flag = reader.read_u8()?;
    if flag == 0 {
        Ok((Either::Left(CellType::Boolean), value.to_string()))
    } else {
        Ok((Either::Left(CellType::Error), to_error_value(value).to_owned()))
    }
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<(CellKind, String), ExtractError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_f64()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<(CellKind, String), ExtractError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_rk()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_label_sst_index(reader: &mut Biff8Reader) -> Result<usize, ExtractError> {
    reader.skip(2)?;
    reader.read_usize()
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<(CellKind, String), ExtractError> {
    reader.skip(2)?;
    let value = reader.read_xl_unicode_string()?;
    Ok((Either::Left(CellType::Text), value))
}

/// Reads the cached result of a FORMULA record. A string result lives in the STRING
/// record that follows, possibly after the SHRFMLA, ARRAY or TABLE record holding the
/// shared formula. An unreadable result becomes a numeric cell with no value, which
/// coerces to the formula error sentinel.
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<(CellKind, String), ExtractError> {
    let index = reader.read_u16()? as usize;
    let formula = reader.read_u64()?;
    let is_number = (formula & 0xFFFF000000000000) != 0xFFFF000000000000;
    let flag = formula & 0xFF;
    let unreadable = || {
        log::debug!("Unreadable formula result {formula:#018x}");
        (Either::Left(CellType::Number), String::new())
    };
    let result = if is_number {
        (Either::Right(index), f64::from_bits(formula).to_string())
    } else if flag == 0 {
        while matches!(reader.peek()?, Some(SHR_FMLA | ARRAY | TABLE)) {
            reader.next()?;
        }
        if reader.peek()? == Some(STRING) {
            reader.next()?;
            match reader.read_xl_unicode_string() {
                Ok(value) => (Either::Left(CellType::Text), value),
                Err(_) => unreadable(),
            }
        } else {
            unreadable()
        }
    } else if flag == 1 {
        let value = if (formula & 0xFF0000) > 0 { "1" } else { "0" };
        (Either::Left(CellType::Boolean), value.to_owned())
    } else if flag == 2 {
        let code = ((formula >> 16) & 0xFF) as u8;
        (Either::Left(CellType::Error), to_error_value(code).to_owned())
    } else if flag == 3 {
        (Either::Left(CellType::Text), String::new())
    } else {
        unreadable()
    };
    Ok(result)
}
