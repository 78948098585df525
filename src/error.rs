use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;
use zip::result::ZipError;

/// Classification of every failure the engine can report.
///
/// Loader tiers, the orchestrator's degraded-success path and metrics all branch on this
/// value instead of on concrete error types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptArchive,
    InvalidEncoding,
    IoFailure,
    CellReadFailure,
    ConcurrencyInfrastructureFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptArchive => "corrupt_archive",
            ErrorKind::InvalidEncoding => "invalid_encoding",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::CellReadFailure => "cell_read_failure",
            ErrorKind::ConcurrencyInfrastructureFailure => "concurrency_infrastructure_failure",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type of the extraction engine.
/// Aggregates errors from the standard library, dependencies and internal modules.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    CorruptArchive(String),

    #[error("{0}")]
    InvalidEncoding(String),

    #[error("{0}")]
    ConcurrencyInfrastructure(String),

    #[error("{0}")]
    CellRead(String),

    #[error("Sheet '{0}' not found")]
    SheetNotFound(String),

    #[error("{0}: {1}")]
    WithContext(String, Box<ExtractError>),

    // Standard library errors
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    StringEncoding(#[from] std::str::Utf8Error),

    // Third-party library errors
    #[error("{0}")]
    Zip(#[from] ZipError),

    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncoding(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    Cfb(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelper(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8(#[from] crate::helpers::biff8::Biff8Error),

    #[error("{0}")]
    Biff12(#[from] crate::helpers::biff12::Biff12Error),

    #[error("{0}")]
    Archive(#[from] crate::helpers::zip::ArchiveError),

    // Spreadsheet module errors
    #[error("{0}")]
    Spreadsheet(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    Xls(#[from] crate::spreadsheet::xls::XlsError),
}

impl ExtractError {
    /// Maps the concrete failure onto the taxonomy the loader and orchestrator act on.
    pub fn kind(&self) -> ErrorKind {
        use crate::spreadsheet::xls::XlsError;
        use crate::spreadsheet::SpreadsheetError;

        match self {
            ExtractError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ExtractError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            ExtractError::InvalidEncoding(_) => ErrorKind::InvalidEncoding,
            ExtractError::ConcurrencyInfrastructure(_) => ErrorKind::ConcurrencyInfrastructureFailure,
            ExtractError::CellRead(_) => ErrorKind::CellReadFailure,
            ExtractError::SheetNotFound(_) => ErrorKind::CorruptArchive,
            ExtractError::WithContext(_, source) => source.kind(),
            ExtractError::Io(_) => ErrorKind::IoFailure,
            ExtractError::ParseInt(_) | ExtractError::ParseFloat(_) => ErrorKind::CorruptArchive,
            ExtractError::StringEncoding(_) | ExtractError::XmlEncoding(_) => ErrorKind::InvalidEncoding,
            ExtractError::Zip(ZipError::Io(_)) => ErrorKind::IoFailure,
            ExtractError::Zip(_) => ErrorKind::CorruptArchive,
            ExtractError::Xml(quick_xml::Error::Io(_)) => ErrorKind::IoFailure,
            ExtractError::Xml(quick_xml::Error::Encoding(_)) => ErrorKind::InvalidEncoding,
            ExtractError::Xml(_) | ExtractError::XmlAttribute(_) | ExtractError::XmlHelper(_) => ErrorKind::CorruptArchive,
            ExtractError::Cfb(_) | ExtractError::Biff8(_) | ExtractError::Biff12(_) => ErrorKind::CorruptArchive,
            ExtractError::Archive(_) => ErrorKind::CorruptArchive,
            ExtractError::Spreadsheet(SpreadsheetError::PasswordProtected(_)) => ErrorKind::UnsupportedFormat,
            ExtractError::Spreadsheet(SpreadsheetError::UnknownFormat(_)) => ErrorKind::UnsupportedFormat,
            ExtractError::Spreadsheet(_) => ErrorKind::CorruptArchive,
            ExtractError::Xls(XlsError::CodePage(_)) => ErrorKind::InvalidEncoding,
            ExtractError::Xls(_) => ErrorKind::CorruptArchive,
        }
    }
}

pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, ExtractError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| ExtractError::WithContext(message.to_owned(), Box::new(e)))
    }
}
