//! Opens a [`SourceFile`] into a [`WorkbookHandle`] through an ordered chain of load
//! strategies.
//!
//! Every strategy is a [`LoadStep`]: a condition over the file and the previous failure,
//! plus an attempt returning a [`LoadOutcome`]. The chain stops at the first handle or
//! fatal error. Otherwise the last recoverable error is surfaced.

use crate::config::ArchiveLimits;
use crate::config::LoaderConfig;
use crate::error::ErrorKind;
use crate::error::ExtractError;
use crate::helpers::reader::SourceReader;
use crate::source::SourceFile;
use crate::spreadsheet;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xlsb::XlsbSpreadsheet;
use crate::spreadsheet::FileFormat;
use crate::spreadsheet::OpenOptions;
use crate::spreadsheet::ParseMode;
use crate::spreadsheet::Spreadsheet;
use serde::Serialize;
use std::fmt::Display;
use zip::ZipArchive;

pub const CSV_NOT_SUPPORTED: &str = "CSV files not yet supported directly. Please convert to Excel format.";
pub const XLSB_NOT_SUPPORTED: &str = "This XLSB file format cannot be processed. Please convert it to XLSX format.";
pub const CORRUPTED_DATA: &str = "File contains corrupted data that cannot be processed";

/// Strategy that produced a workbook handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LoadTier {
    /// Content-detected reader, strict parsing, configured archive limits
    Standard,
    /// Direct archive access for .xlsb, no archive limits
    ContainerFallback,
    /// Tolerant parsing that skips auxiliary parts
    PartialWorkbook,
    /// Extension-chosen reader over the raw bytes
    DirectConstruction,
}

impl Display for LoadTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadTier::Standard => "standard",
            LoadTier::ContainerFallback => "container fallback",
            LoadTier::PartialWorkbook => "partial workbook",
            LoadTier::DirectConstruction => "direct construction",
        };
        f.write_str(name)
    }
}

/// Result of one load attempt.
pub enum LoadOutcome {
    Loaded(WorkbookHandle),
    /// The next applicable step may still succeed
    Recoverable(ExtractError),
    /// Stops the chain
    Fatal(ExtractError),
}

/// Failure of the previous step, used to pick the next one
pub struct LoadFailure<'a> {
    pub tier: LoadTier,
    pub error: &'a ExtractError,
}

/// One entry of the fallback chain.
pub struct LoadStep {
    pub tier: LoadTier,
    /// Whether the step runs, given the failure of the step before it
    pub applies: fn(&SourceFile, Option<&LoadFailure>) -> bool,
    pub attempt: fn(&LoaderConfig, &SourceFile) -> LoadOutcome,
}

static CHAIN: [LoadStep; 4] = [
    LoadStep {
        tier: LoadTier::Standard,
        applies: is_first_attempt,
        attempt: load_standard,
    },
    LoadStep {
        tier: LoadTier::ContainerFallback,
        applies: is_unreadable_xlsb,
        attempt: load_container_fallback,
    },
    LoadStep {
        tier: LoadTier::PartialWorkbook,
        applies: is_invalid_encoding,
        attempt: load_partial_workbook,
    },
    LoadStep {
        tier: LoadTier::DirectConstruction,
        applies: is_partial_failure,
        attempt: load_direct,
    },
];

fn is_first_attempt(_file: &SourceFile, failure: Option<&LoadFailure>) -> bool {
    failure.is_none()
}

fn is_unreadable_xlsb(file: &SourceFile, failure: Option<&LoadFailure>) -> bool {
    file.format == FileFormat::Xlsb
        && failure.is_some_and(|failure| {
            failure.tier == LoadTier::Standard
                && matches!(failure.error.kind(), ErrorKind::CorruptArchive | ErrorKind::UnsupportedFormat)
        })
}

fn is_invalid_encoding(_file: &SourceFile, failure: Option<&LoadFailure>) -> bool {
    failure.is_some_and(|failure| failure.tier == LoadTier::Standard && failure.error.kind() == ErrorKind::InvalidEncoding)
}

fn is_partial_failure(file: &SourceFile, failure: Option<&LoadFailure>) -> bool {
    matches!(file.format, FileFormat::Xlsx | FileFormat::Xls)
        && failure.is_some_and(|failure| failure.tier == LoadTier::PartialWorkbook)
}

/// An open workbook. Dropping it releases every buffer and file handle it owns.
pub struct WorkbookHandle {
    spreadsheet: Box<dyn Spreadsheet>,
    tier: LoadTier,
}

impl std::fmt::Debug for WorkbookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookHandle")
            .field("format", &self.spreadsheet.format())
            .field("tier", &self.tier)
            .finish()
    }
}

impl WorkbookHandle {
    fn new(spreadsheet: Box<dyn Spreadsheet>, tier: LoadTier) -> WorkbookHandle {
        WorkbookHandle { spreadsheet, tier }
    }

    /// Strategy that opened this workbook
    pub fn tier(&self) -> LoadTier {
        self.tier
    }

    /// Format of the content, which may differ from the file extension
    pub fn format(&self) -> FileFormat {
        self.spreadsheet.format()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.spreadsheet.sheet_names()
    }

    pub fn sheet_count(&self) -> usize {
        self.spreadsheet.sheet_names().len()
    }

    /// Parses the worksheet at `index`
    pub fn read_sheet(&mut self, index: usize) -> Result<Sheet, ExtractError> {
        self.spreadsheet.read_sheet(index)
    }

    /// Parses the worksheet called `name`
    pub fn read_sheet_by_name(&mut self, name: &str) -> Result<Sheet, ExtractError> {
        let index = self
            .sheet_names()
            .iter()
            .position(|sheet| sheet == name)
            .ok_or_else(|| ExtractError::SheetNotFound(name.to_owned()))?;
        self.read_sheet(index)
    }

    /// Releases the workbook now instead of at the end of scope
    pub fn close(self) {
        log::trace!("Closing {:?}", self);
    }
}

/// Opens workbooks with the fallback chain.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorkbookLoader {
    config: LoaderConfig,
}

impl WorkbookLoader {
    pub fn new(config: LoaderConfig) -> WorkbookLoader {
        WorkbookLoader { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The ordered fallback chain
    pub fn steps() -> &'static [LoadStep] {
        &CHAIN
    }

    pub fn load(&self, file: &SourceFile) -> Result<WorkbookHandle, ExtractError> {
        if file.format == FileFormat::Csv {
            return Err(ExtractError::UnsupportedFormat(CSV_NOT_SUPPORTED.to_owned()));
        }

        self.run(file, None)
    }

    /// Reopens a file whose worksheet failed after the standard strategy had loaded it,
    /// continuing the chain as if that strategy had failed with `error`.
    pub fn reload(&self, file: &SourceFile, error: ExtractError) -> Result<WorkbookHandle, ExtractError> {
        self.run(file, Some((LoadTier::Standard, error)))
    }

    fn run(&self, file: &SourceFile, mut last: Option<(LoadTier, ExtractError)>) -> Result<WorkbookHandle, ExtractError> {
        for step in Self::steps() {
            let failure = last.as_ref().map(|(tier, error)| LoadFailure { tier: *tier, error });
            if !(step.applies)(file, failure.as_ref()) {
                continue;
            }
            log::debug!("Loading '{}' with the {} strategy", file.path.display(), step.tier);
            match (step.attempt)(&self.config, file) {
                LoadOutcome::Loaded(handle) => {
                    if step.tier != LoadTier::Standard {
                        log::info!("Loaded '{}' with the {} strategy", file.path.display(), step.tier);
                    }
                    return Ok(handle);
                }
                LoadOutcome::Recoverable(error) => {
                    log::warn!(
                        "The {} strategy failed for '{}' ({}): {}",
                        step.tier,
                        file.path.display(),
                        error.kind(),
                        error
                    );
                    last = Some((step.tier, error));
                }
                LoadOutcome::Fatal(error) => return Err(error),
            }
        }

        Err(match last {
            Some((_, error)) => error,
            None => ExtractError::UnsupportedFormat(format!("No load strategy for '{}'", file.path.display())),
        })
    }

    /// Lists worksheet names while ignoring every other workbook part.
    pub fn recover_sheet_names(&self, file: &SourceFile) -> Result<Vec<String>, ExtractError> {
        let source = SourceReader::stream(&file.path)?;
        let options = OpenOptions {
            limits: self.config.archive,
            mode: ParseMode::Tolerant,
        };
        spreadsheet::read_sheet_names(source, options)
    }
}

fn load_standard(config: &LoaderConfig, file: &SourceFile) -> LoadOutcome {
    let source = if file.format == FileFormat::Xlsb {
        SourceReader::stream(&file.path)
    } else {
        SourceReader::open(&file.path, file.size, config.buffered_read, config.buffered_read_threshold)
    };
    let source = match source {
        Ok(source) => source,
        Err(error) => return LoadOutcome::Recoverable(error.into()),
    };
    let options = OpenOptions {
        limits: config.archive,
        mode: ParseMode::Strict,
    };
    match spreadsheet::open_detected(source, options) {
        Ok(spreadsheet) => LoadOutcome::Loaded(WorkbookHandle::new(spreadsheet, LoadTier::Standard)),
        Err(error) => LoadOutcome::Recoverable(error),
    }
}

fn load_container_fallback(_config: &LoaderConfig, file: &SourceFile) -> LoadOutcome {
    let options = OpenOptions {
        limits: ArchiveLimits::unbounded(),
        mode: ParseMode::Tolerant,
    };
    let result = SourceReader::stream(&file.path)
        .map_err(ExtractError::from)
        .and_then(|source| Ok(ZipArchive::new(source)?))
        .and_then(|zip| XlsbSpreadsheet::open(zip, options));
    match result {
        Ok(spreadsheet) => LoadOutcome::Loaded(WorkbookHandle::new(Box::new(spreadsheet), LoadTier::ContainerFallback)),
        Err(error) => {
            log::warn!("Archive-level access to '{}' failed: {}", file.path.display(), error);
            LoadOutcome::Fatal(ExtractError::UnsupportedFormat(XLSB_NOT_SUPPORTED.to_owned()))
        }
    }
}

fn load_partial_workbook(config: &LoaderConfig, file: &SourceFile) -> LoadOutcome {
    let options = OpenOptions {
        limits: config.archive,
        mode: ParseMode::Tolerant,
    };
    let result = SourceReader::stream(&file.path)
        .map_err(ExtractError::from)
        .and_then(|source| spreadsheet::open_detected(source, options));
    match result {
        Ok(spreadsheet) => LoadOutcome::Loaded(WorkbookHandle::new(spreadsheet, LoadTier::PartialWorkbook)),
        Err(error) => LoadOutcome::Recoverable(error),
    }
}

fn load_direct(_config: &LoaderConfig, file: &SourceFile) -> LoadOutcome {
    let options = OpenOptions {
        limits: ArchiveLimits::unbounded(),
        mode: ParseMode::Tolerant,
    };
    let result = SourceReader::buffered(&file.path)
        .map_err(ExtractError::from)
        .and_then(|source| spreadsheet::open_as(file.format, source, options));
    match result {
        Ok(spreadsheet) => LoadOutcome::Loaded(WorkbookHandle::new(spreadsheet, LoadTier::DirectConstruction)),
        Err(error) => LoadOutcome::Fatal(ExtractError::InvalidEncoding(format!("{CORRUPTED_DATA}: {error}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(directory: &tempfile::TempDir, name: &str, content: &[u8]) -> SourceFile {
        let path = directory.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        SourceFile::from_path(path).unwrap()
    }

    #[test]
    fn csv_is_rejected_before_any_io() {
        let file = SourceFile::new("missing/data.csv", FileFormat::Csv, 0);
        let error = WorkbookLoader::default().load(&file).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(error.to_string(), CSV_NOT_SUPPORTED);
    }

    #[test]
    fn unreadable_xlsb_asks_for_conversion() {
        let directory = tempfile::tempdir().unwrap();
        let file = write(&directory, "broken.xlsb", b"definitely not a workbook");
        let error = WorkbookLoader::default().load(&file).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(error.to_string(), XLSB_NOT_SUPPORTED);
    }

    #[test]
    fn unrecognized_content_surfaces_the_standard_error() {
        let directory = tempfile::tempdir().unwrap();
        let file = write(&directory, "notes.xlsx", b"plain text");
        let error = WorkbookLoader::default().load(&file).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn missing_files_are_io_failures() {
        let file = SourceFile::new("missing/report.xlsx", FileFormat::Xlsx, 0);
        let error = WorkbookLoader::default().load(&file).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn chain_conditions() {
        let xlsx = SourceFile::new("a.xlsx", FileFormat::Xlsx, 0);
        let xlsb = SourceFile::new("a.xlsb", FileFormat::Xlsb, 0);
        let corrupt = ExtractError::CorruptArchive("bad".to_owned());
        let encoding = ExtractError::InvalidEncoding("bad".to_owned());
        let after = |tier, error| Some(LoadFailure { tier, error });
        let [standard, container, partial, direct] = &CHAIN;

        assert!((standard.applies)(&xlsx, None));
        assert!(!(standard.applies)(&xlsx, after(LoadTier::Standard, &corrupt).as_ref()));

        assert!((container.applies)(&xlsb, after(LoadTier::Standard, &corrupt).as_ref()));
        assert!(!(container.applies)(&xlsx, after(LoadTier::Standard, &corrupt).as_ref()));
        assert!(!(container.applies)(&xlsb, after(LoadTier::Standard, &encoding).as_ref()));

        assert!((partial.applies)(&xlsx, after(LoadTier::Standard, &encoding).as_ref()));
        assert!(!(partial.applies)(&xlsx, after(LoadTier::Standard, &corrupt).as_ref()));

        assert!((direct.applies)(&xlsx, after(LoadTier::PartialWorkbook, &corrupt).as_ref()));
        assert!(!(direct.applies)(&xlsb, after(LoadTier::PartialWorkbook, &corrupt).as_ref()));
        assert!(!(direct.applies)(&xlsx, after(LoadTier::Standard, &encoding).as_ref()));
    }
}
