//! Workbook readers for .xlsx, .xls and .xlsb files and the .xlsx writer.
//!
//! Every reader loads the workbook catalogue eagerly and parses worksheets on demand
//! into a [`Sheet`]. Container detection looks at the file content, not its name.

pub mod cell;
pub(crate) mod excel;
pub(crate) mod reference;
pub mod sheet;
pub(crate) mod writer;
pub(crate) mod xls;
pub(crate) mod xlsb;
pub(crate) mod xlsx;

use crate::config::ArchiveLimits;
use crate::error::ExtractError;
use crate::helpers::cfb;
use crate::helpers::reader::SourceReader;
use crate::helpers::zip::ZipHelper;
use serde::Deserialize;
use serde::Serialize;
use sheet::Sheet;
use std::fmt::Display;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use thiserror::Error;
use xls::XlsSpreadsheet;
use xlsb::XlsbSpreadsheet;
use xlsx::XlsxSpreadsheet;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Workbook is password protected ({0})")]
    PasswordProtected(String),

    #[error("Unrecognized workbook content: {0}")]
    UnknownFormat(String),

    #[error("Workbook has no worksheets ({0})")]
    Empty(String),

    #[error("Workbook part '{0}' is missing")]
    MissingPart(String),
}

/// File format tag, inferred from the file extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Xlsx,
    Xls,
    Xlsb,
    Csv,
}

impl FileFormat {
    /// Case-insensitive lookup of an extension without the leading dot
    pub fn from_extension(extension: &str) -> Option<FileFormat> {
        match extension.to_ascii_lowercase().as_str() {
            "xlsx" => Some(FileFormat::Xlsx),
            "xls" => Some(FileFormat::Xls),
            "xlsb" => Some(FileFormat::Xlsb),
            "csv" => Some(FileFormat::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<FileFormat> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(FileFormat::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => "xlsx",
            FileFormat::Xls => "xls",
            FileFormat::Xlsb => "xlsb",
            FileFormat::Csv => "csv",
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strictly workbook parts are parsed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ParseMode {
    /// Text must be valid UTF-8 and auxiliary parts are validated.
    Strict,
    /// Text is decoded lossily and auxiliary parts are never opened.
    Tolerant,
}

impl ParseMode {
    pub(crate) fn is_strict(&self) -> bool {
        *self == ParseMode::Strict
    }

    pub(crate) fn is_lossy(&self) -> bool {
        *self == ParseMode::Tolerant
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct OpenOptions {
    pub(crate) limits: ArchiveLimits,
    pub(crate) mode: ParseMode,
}

/// A workbook opened by one of the format readers.
pub(crate) trait Spreadsheet {
    fn format(&self) -> FileFormat;

    /// Worksheet names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    /// Parses the worksheet at `index` into memory
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, ExtractError>;
}

/// Container kinds recognised from the leading bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Container {
    Zip,
    Compound,
}

/// Identifies the container from its magic bytes and rewinds the source.
pub(crate) fn sniff<RS: Read + Seek>(source: &mut RS) -> Result<Option<Container>, ExtractError> {
    let mut magic = [0u8; 8];
    let mut filled = 0usize;
    while filled < magic.len() {
        match source.read(&mut magic[filled..])? {
            0 => break,
            size => filled += size,
        }
    }
    source.seek(SeekFrom::Start(0))?;

    let magic = &magic[..filled];
    if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
        Ok(Some(Container::Zip))
    } else if cfb::has_signature(magic) {
        Ok(Some(Container::Compound))
    } else {
        Ok(None)
    }
}

/// Opens a workbook of whatever format the content turns out to be.
pub(crate) fn open_detected(mut source: SourceReader, options: OpenOptions) -> Result<Box<dyn Spreadsheet>, ExtractError> {
    match sniff(&mut source)? {
        Some(Container::Zip) => {
            let zip = ZipArchive::new(source)?;
            if zip.find_name(xlsb::WORKBOOK_PART).is_some() {
                Ok(Box::new(XlsbSpreadsheet::open(zip, options)?))
            } else if zip.find_name(xlsx::WORKBOOK_PART).is_some() {
                Ok(Box::new(XlsxSpreadsheet::open(zip, options)?))
            } else {
                Err(SpreadsheetError::UnknownFormat("ZIP archive without a workbook part".to_owned()))?
            }
        }
        Some(Container::Compound) => Ok(Box::new(XlsSpreadsheet::open(source, options)?)),
        None => Err(SpreadsheetError::UnknownFormat("neither a ZIP archive nor a compound file".to_owned()))?,
    }
}

/// Opens a workbook with the reader for `format`, skipping content detection.
pub(crate) fn open_as(format: FileFormat, source: SourceReader, options: OpenOptions) -> Result<Box<dyn Spreadsheet>, ExtractError> {
    match format {
        FileFormat::Xlsx => Ok(Box::new(XlsxSpreadsheet::open(ZipArchive::new(source)?, options)?)),
        FileFormat::Xlsb => Ok(Box::new(XlsbSpreadsheet::open(ZipArchive::new(source)?, options)?)),
        FileFormat::Xls => Ok(Box::new(XlsSpreadsheet::open(source, options)?)),
        FileFormat::Csv => Err(SpreadsheetError::UnknownFormat("csv".to_owned()))?,
    }
}

/// Reads only the worksheet names, decoding leniently and ignoring every other part.
pub(crate) fn read_sheet_names(mut source: SourceReader, options: OpenOptions) -> Result<Vec<String>, ExtractError> {
    match sniff(&mut source)? {
        Some(Container::Zip) => {
            let mut zip = ZipArchive::new(source)?;
            if zip.find_name(xlsb::WORKBOOK_PART).is_some() {
                xlsb::read_sheet_names(&mut zip, &options)
            } else {
                xlsx::read_sheet_names(&mut zip, &options)
            }
        }
        Some(Container::Compound) => xls::read_sheet_names(&mut source),
        None => Err(SpreadsheetError::UnknownFormat("neither a ZIP archive nor a compound file".to_owned()))?,
    }
}
