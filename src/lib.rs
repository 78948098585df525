//! # Spreadsheet Extraction Engine
//!
//! Turns heterogeneous, sometimes damaged spreadsheet files into normalized, typed row
//! records.
//!
//! ## Features
//!
//! - **Multi-format support**: `.xlsx` (ZIP + XML), `.xls` (OLE compound file + BIFF8)
//!   and `.xlsb` (ZIP + BIFF12), read with pure Rust container and record readers
//! - **Fallback loading**: a chain of load strategies survives compression-ratio false
//!   positives, invalid text in pivot caches and partially broken packages
//! - **Schema inference**: column names derived from sampled rows, unique and non-blank
//!   even when the header row is not trustworthy
//! - **Canonical values**: every cell becomes a [`CellValue`], and unreadable cells turn
//!   into sentinel strings instead of errors
//! - **Batched, parallel extraction**: rows are walked in fixed-size batches and files are
//!   processed on a bounded rayon pool with per-file failure isolation
//! - **Column transformations**: derived columns from joined values, saved as a new
//!   `.xlsx` workbook
//!
//! ## Example
//!
//! ```no_run
//! use sheet_extract::{ExtractorConfig, FileExtractionOrchestrator, LogMetrics, SourceFile};
//! use std::sync::Arc;
//!
//! let orchestrator = FileExtractionOrchestrator::new(ExtractorConfig::default(), Arc::new(LogMetrics));
//! let files = vec![SourceFile::from_path("reports/sales.xlsx")?];
//! for result in orchestrator.extract_all(&files) {
//!     println!("{}: {} ({} rows)", result.file_name, result.message, result.total_rows);
//! }
//! # Ok::<(), sheet_extract::ExtractError>(())
//! ```

mod coerce;
mod combine;
mod config;
mod error;
mod extract;
mod helpers;
mod loader;
mod metrics;
mod operations;
mod orchestrator;
mod source;
mod spreadsheet;
mod structure;

pub use coerce::coerce;
pub use coerce::string_form;
pub use coerce::CellValue;
pub use coerce::ERROR_READING_CELL;
pub use coerce::FORMULA_ERROR;
pub use coerce::FORMULA_RESULT_ERROR;
pub use combine::combine;
pub use combine::combine_all;
pub use combine::normalize_output_name;
pub use combine::CombinedTable;
pub use combine::TransformationSpec;
pub use combine::OUTPUT_SHEET_NAME;
pub use config::ArchiveLimits;
pub use config::ExtractorConfig;
pub use config::LoaderConfig;
pub use error::ErrorKind;
pub use error::ExtractError;
pub use extract::Batches;
pub use extract::RowBatchExtractor;
pub use extract::RowRecord;
pub use loader::LoadFailure;
pub use loader::LoadOutcome;
pub use loader::LoadStep;
pub use loader::LoadTier;
pub use loader::WorkbookHandle;
pub use loader::WorkbookLoader;
pub use loader::CORRUPTED_DATA;
pub use loader::CSV_NOT_SUPPORTED;
pub use loader::XLSB_NOT_SUPPORTED;
pub use metrics::LogMetrics;
pub use metrics::MemoryMetrics;
pub use metrics::MetricEvent;
pub use metrics::MetricsSink;
pub use metrics::NoopMetrics;
pub use operations::data_summary;
pub use operations::perform;
pub use operations::ColumnStatistics;
pub use operations::DataOperation;
pub use operations::DataSummary;
pub use operations::OperationReport;
pub use operations::UnknownOperation;
pub use orchestrator::FileExtractionOrchestrator;
pub use orchestrator::FileExtractionResult;
pub use orchestrator::SHEET_NAMES_ONLY_MESSAGE;
pub use orchestrator::SUCCESS_MESSAGE;
pub use orchestrator::XLSB_WARNING;
pub use source::SourceFile;
pub use spreadsheet::cell::Cell;
pub use spreadsheet::cell::CellType;
pub use spreadsheet::sheet::Row;
pub use spreadsheet::sheet::Sheet;
pub use spreadsheet::FileFormat;
pub use spreadsheet::SpreadsheetError;
pub use structure::ColumnMapping;
pub use structure::StructureAnalyzer;
