//! Runs the load → analyze → extract pipeline over many files.
//!
//! Files are processed on a local rayon pool when parallelism is enabled. If the pool
//! itself misbehaves, the whole batch is re-run sequentially and the parallel output is
//! discarded. Metric events are buffered per file and emitted once the final result list
//! exists, so a re-run never counts a file twice.

use crate::config::ExtractorConfig;
use crate::error::ErrorKind;
use crate::error::ExtractError;
use crate::extract::RowBatchExtractor;
use crate::extract::RowRecord;
use crate::loader::LoadTier;
use crate::loader::WorkbookHandle;
use crate::loader::WorkbookLoader;
use crate::loader::CORRUPTED_DATA;
use crate::metrics;
use crate::metrics::MetricEvent;
use crate::metrics::MetricsSink;
use crate::source::SourceFile;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::FileFormat;
use crate::structure::StructureAnalyzer;
use rayon::prelude::*;
use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::any::Any;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

pub const SUCCESS_MESSAGE: &str = "Successfully extracted data";
pub const XLSB_WARNING: &str = " (Warning: XLSB files have limited support. Some data may not be extracted correctly.)";
pub const SHEET_NAMES_ONLY_MESSAGE: &str =
    "Successfully extracted sheet names, but couldn't extract full data due to encoding issues in pivot tables";

/// Outcome of extracting one file. Every requested file gets one.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileExtractionResult {
    pub file_name: String,
    pub success: bool,
    pub message: String,
    pub total_sheets: usize,
    pub total_rows: usize,
    pub sheet_names: Vec<String>,
    pub records: Vec<RowRecord>,
}

impl FileExtractionResult {
    fn failure(file_name: String, message: String) -> FileExtractionResult {
        FileExtractionResult {
            file_name,
            success: false,
            message,
            ..FileExtractionResult::default()
        }
    }
}

/// A file result plus the metric events it produced, not yet emitted
struct FileOutcome {
    result: FileExtractionResult,
    events: Vec<MetricEvent>,
}

pub struct FileExtractionOrchestrator {
    config: ExtractorConfig,
    loader: WorkbookLoader,
    analyzer: StructureAnalyzer,
    extractor: RowBatchExtractor,
    metrics: Arc<dyn MetricsSink>,
    pool: Option<ThreadPool>,
}

impl FileExtractionOrchestrator {
    pub fn new(config: ExtractorConfig, metrics: Arc<dyn MetricsSink>) -> FileExtractionOrchestrator {
        let pool = if config.parallel {
            match ThreadPoolBuilder::new()
                .num_threads(config.pool_size.max(1))
                .thread_name(|index| format!("sheet-extract-{index}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(error) => {
                    log::warn!("Cannot build a pool of {} workers, files will run sequentially: {}", config.pool_size, error);
                    None
                }
            }
        } else {
            None
        };
        log::info!(
            "Extraction engine ready (parallel={}, pool_size={}, batch_size={}, buffered_read={})",
            config.parallel,
            config.pool_size,
            config.batch_size,
            config.buffered_read
        );

        FileExtractionOrchestrator {
            loader: WorkbookLoader::new(config.loader()),
            analyzer: StructureAnalyzer::new(&config),
            extractor: RowBatchExtractor::new(&config),
            config,
            metrics,
            pool,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extracts every file, returning results aligned with `files`.
    pub fn extract_all(&self, files: &[SourceFile]) -> Vec<FileExtractionResult> {
        let started = Instant::now();
        let outcomes = if self.config.parallel && files.len() > 1 {
            match self.extract_parallel(files) {
                Ok(outcomes) => outcomes,
                Err(error) => {
                    log::warn!("Parallel extraction failed, processing {} files sequentially: {}", files.len(), error);
                    self.extract_sequential(files)
                }
            }
        } else {
            self.extract_sequential(files)
        };

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            metrics::emit(self.metrics.as_ref(), outcome.events);
            results.push(outcome.result);
        }
        log::info!("Processed {} files in {} ms", files.len(), started.elapsed().as_millis());
        results
    }

    fn extract_parallel(&self, files: &[SourceFile]) -> Result<Vec<FileOutcome>, ExtractError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| ExtractError::ConcurrencyInfrastructure("worker pool is not available".to_owned()))?;
        log::info!("Extracting {} files on {} workers", files.len(), pool.current_num_threads());

        let outcomes = catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| files.par_iter().map(|file| self.extract_isolated(file)).collect::<Vec<_>>())
        }))
        .map_err(|panic| ExtractError::ConcurrencyInfrastructure(format!("worker pool panicked: {}", panic_message(&*panic))))?;

        if outcomes.len() != files.len() {
            return Err(ExtractError::ConcurrencyInfrastructure(format!(
                "expected {} results, the pool returned {}",
                files.len(),
                outcomes.len()
            )));
        }
        Ok(outcomes)
    }

    fn extract_sequential(&self, files: &[SourceFile]) -> Vec<FileOutcome> {
        files.iter().map(|file| self.extract_isolated(file)).collect()
    }

    /// Extracts one file, turning a panic into a failed result for that file only.
    fn extract_isolated(&self, file: &SourceFile) -> FileOutcome {
        let started = Instant::now();
        let file_name = file.file_name();
        match catch_unwind(AssertUnwindSafe(|| self.extract_file(file))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&*panic);
                log::error!("Extraction of '{}' panicked: {}", file_name, message);
                FileOutcome {
                    result: FileExtractionResult::failure(file_name.clone(), format!("Error: {message}")),
                    events: vec![MetricEvent::FileElapsed { file: file_name, elapsed: started.elapsed() }],
                }
            }
        }
    }

    fn extract_file(&self, file: &SourceFile) -> FileOutcome {
        let started = Instant::now();
        let file_name = file.file_name();
        let mut events = Vec::new();

        let result = match self.loader.load(file) {
            Ok(handle) => self.extract_workbook(file, handle, &mut events),
            Err(error) if error.kind() == ErrorKind::InvalidEncoding => {
                events.push(MetricEvent::Error { kind: error.kind() });
                self.recover_sheet_names(file, &error)
            }
            Err(error) => {
                log::error!("Cannot load '{}': {}", file_name, error);
                events.push(MetricEvent::Error { kind: error.kind() });
                FileExtractionResult::failure(file_name.clone(), failure_message(&error))
            }
        };

        events.push(MetricEvent::FileProcessed { format: file.format });
        if result.total_rows > 0 {
            events.push(MetricEvent::RowsProcessed { count: result.total_rows });
        }
        events.push(MetricEvent::FileElapsed {
            file: file_name.clone(),
            elapsed: started.elapsed(),
        });
        log::info!(
            "Processed '{}' in {} ms: {} rows from {} sheets",
            file_name,
            started.elapsed().as_millis(),
            result.total_rows,
            result.total_sheets
        );
        FileOutcome { result, events }
    }

    fn extract_workbook(&self, file: &SourceFile, mut handle: WorkbookHandle, events: &mut Vec<MetricEvent>) -> FileExtractionResult {
        let file_name = file.file_name();
        let sheet_names = handle.sheet_names();
        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut tolerant = None;

        for (index, sheet_name) in sheet_names.iter().enumerate() {
            let started = Instant::now();
            match self.read_sheet(file, &mut handle, &mut tolerant, index) {
                Ok(sheet) => {
                    let mapping = self.analyzer.analyze(&sheet);
                    let before = records.len();
                    records.extend(self.extractor.extract(&sheet, &mapping, &file_name));
                    log::debug!(
                        "Sheet '{}' of '{}': {} columns, {} rows in {} ms",
                        sheet_name,
                        file_name,
                        mapping.len(),
                        records.len() - before,
                        started.elapsed().as_millis()
                    );
                }
                Err(error) => {
                    log::warn!("Cannot read sheet '{}' of '{}': {}", sheet_name, file_name, error);
                    events.push(MetricEvent::Error { kind: error.kind() });
                    failures.push(format!("Failed to read sheet '{sheet_name}': {error}"));
                }
            }
            events.push(MetricEvent::SheetElapsed {
                file: file_name.clone(),
                sheet: sheet_name.clone(),
                elapsed: started.elapsed(),
            });
        }

        let total_sheets = handle.sheet_count();
        let format = handle.format();
        handle.close();
        if let Some(tolerant) = tolerant {
            tolerant.close();
        }

        let mut message = SUCCESS_MESSAGE.to_owned();
        if file.format == FileFormat::Xlsb || format == FileFormat::Xlsb {
            message.push_str(XLSB_WARNING);
        }
        for failure in failures {
            message.push_str("; ");
            message.push_str(&failure);
        }

        FileExtractionResult {
            file_name,
            success: true,
            message,
            total_sheets,
            total_rows: records.len(),
            sheet_names,
            records,
        }
    }

    /// Reads one worksheet. A sheet with invalid text in a strictly loaded workbook is
    /// read again from a handle opened by the tolerant strategies, shared by later sheets.
    fn read_sheet(
        &self,
        file: &SourceFile,
        handle: &mut WorkbookHandle,
        tolerant: &mut Option<WorkbookHandle>,
        index: usize,
    ) -> Result<Sheet, ExtractError> {
        let error = match handle.read_sheet(index) {
            Err(error) if error.kind() == ErrorKind::InvalidEncoding && handle.tier() == LoadTier::Standard => error,
            result => return result,
        };
        log::warn!("Sheet {} of '{}' has invalid text ({}), reading it tolerantly", index, file.file_name(), error);
        let mut reopened = match tolerant.take() {
            Some(reopened) => reopened,
            None => self.loader.reload(file, error)?,
        };
        let sheet = reopened.read_sheet(index);
        *tolerant = Some(reopened);
        sheet
    }

    /// Degraded success for workbooks whose content cannot be decoded: names only.
    fn recover_sheet_names(&self, file: &SourceFile, error: &ExtractError) -> FileExtractionResult {
        let file_name = file.file_name();
        log::warn!("'{}' has invalid text ({}), listing sheet names only", file_name, error);
        match self.loader.recover_sheet_names(file) {
            Ok(names) => FileExtractionResult {
                file_name,
                success: true,
                message: SHEET_NAMES_ONLY_MESSAGE.to_owned(),
                total_sheets: names.len(),
                total_rows: 0,
                sheet_names: names,
                records: Vec::new(),
            },
            Err(recovery) => {
                log::error!("Sheet name recovery for '{}' failed: {}", file_name, recovery);
                FileExtractionResult::failure(file_name, format!("Error: {CORRUPTED_DATA}: {recovery}"))
            }
        }
    }

    /// Worksheet names of one file, empty when the file cannot be opened.
    pub fn sheet_names(&self, file: &SourceFile) -> Vec<String> {
        if !file.path.is_file() {
            log::warn!("File does not exist: '{}'", file.path.display());
            return Vec::new();
        }
        if file.format == FileFormat::Csv {
            log::warn!("Not a workbook: '{}'", file.path.display());
            return Vec::new();
        }
        match self.loader.load(file) {
            Ok(handle) => {
                let names = handle.sheet_names();
                handle.close();
                names
            }
            Err(error) => {
                log::error!("Cannot list sheets of '{}': {}", file.path.display(), error);
                Vec::new()
            }
        }
    }

    /// Extracts the records of a single worksheet.
    pub fn extract_sheet(&self, file: &SourceFile, sheet_name: &str) -> Result<Vec<RowRecord>, ExtractError> {
        let mut handle = self.loader.load(file)?;
        let sheet = handle.read_sheet_by_name(sheet_name)?;
        handle.close();
        let mapping = self.analyzer.analyze(&sheet);
        Ok(self.extractor.extract(&sheet, &mapping, &file.file_name()))
    }
}

fn failure_message(error: &ExtractError) -> String {
    match error.kind() {
        ErrorKind::IoFailure => format!("Error: I/O error while reading the file: {error}"),
        _ => format!("Error: {error}"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
