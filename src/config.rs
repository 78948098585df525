//! Engine tunables, read once when the orchestrator and loader are built.

use serde::Deserialize;

/// Limits enforced on every archive entry read by the container layer.
///
/// The defaults accept highly compressed parts (spreadsheets full of repeated markup
/// routinely deflate far below the usual zip-bomb thresholds) and entries up to 100 MiB.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchiveLimits {
    /// Smallest accepted `compressed / uncompressed` ratio for an entry.
    pub min_inflate_ratio: f64,
    /// Largest accepted uncompressed entry size in bytes.
    pub max_entry_size: u64,
}

impl ArchiveLimits {
    pub const DEFAULT_MIN_INFLATE_RATIO: f64 = 0.0001;
    pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 100 * 1024 * 1024;

    /// Limits that accept any entry.
    pub fn unbounded() -> Self {
        ArchiveLimits {
            min_inflate_ratio: 0.0,
            max_entry_size: u64::MAX,
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        ArchiveLimits {
            min_inflate_ratio: Self::DEFAULT_MIN_INFLATE_RATIO,
            max_entry_size: Self::DEFAULT_MAX_ENTRY_SIZE,
        }
    }
}

/// Immutable configuration injected into [`crate::WorkbookLoader`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LoaderConfig {
    pub archive: ArchiveLimits,
    /// Read large files fully into memory before parsing.
    pub buffered_read: bool,
    /// Size in bytes above which the buffered path is used.
    pub buffered_read_threshold: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        ExtractorConfig::default().loader()
    }
}

/// All tunables of the extraction engine.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Rows per extraction batch.
    pub batch_size: usize,
    /// Worker threads of the parallel file pool.
    pub pool_size: usize,
    /// Whether multiple files are extracted in parallel.
    pub parallel: bool,
    pub buffered_read: bool,
    pub buffered_read_threshold: u64,
    /// Upper bound on rows sampled by structure analysis.
    pub sample_rows: usize,
    /// Whether the first row of each sheet holds column names.
    pub header_row: bool,
    pub archive: ArchiveLimits,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            batch_size: 1000,
            pool_size: 4,
            parallel: true,
            buffered_read: true,
            buffered_read_threshold: 5 * 1024 * 1024,
            sample_rows: 1000,
            header_row: true,
            archive: ArchiveLimits::default(),
        }
    }
}

impl ExtractorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_header_row(mut self, header_row: bool) -> Self {
        self.header_row = header_row;
        self
    }

    pub fn with_buffered_read(mut self, enabled: bool, threshold: u64) -> Self {
        self.buffered_read = enabled;
        self.buffered_read_threshold = threshold;
        self
    }

    pub fn with_archive_limits(mut self, archive: ArchiveLimits) -> Self {
        self.archive = archive;
        self
    }

    /// The subset of settings the loader depends on.
    pub fn loader(&self) -> LoaderConfig {
        LoaderConfig {
            archive: self.archive,
            buffered_read: self.buffered_read,
            buffered_read_threshold: self.buffered_read_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ExtractorConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.pool_size, 4);
        assert!(config.parallel);
        assert_eq!(config.archive.max_entry_size, 100 * 1024 * 1024);
        assert_eq!(config.archive.min_inflate_ratio, 0.0001);
        assert_eq!(config.loader().buffered_read_threshold, 5 * 1024 * 1024);
    }

    #[test]
    fn partial_configuration_falls_back_to_defaults() {
        let config: ExtractorConfig = serde_json::from_str(r#"{"batch_size": 50, "archive": {"max_entry_size": 1024}}"#).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.archive.max_entry_size, 1024);
        assert_eq!(config.archive.min_inflate_ratio, ArchiveLimits::DEFAULT_MIN_INFLATE_RATIO);
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = ExtractorConfig::default().with_batch_size(0).with_pool_size(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.pool_size, 1);
    }
}
