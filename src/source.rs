use crate::error::ExtractError;
use crate::spreadsheet::FileFormat;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// A spreadsheet file chosen by the caller for extraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub format: FileFormat,
    /// Size in bytes at the time the file was described
    pub size: u64,
}

impl SourceFile {
    /// Describes a file on disk, taking the format from its extension and the size
    /// from its metadata.
    pub fn from_path(path: impl AsRef<Path>) -> Result<SourceFile, ExtractError> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path).ok_or_else(|| {
            ExtractError::UnsupportedFormat(format!("Unsupported file type: '{}'", path.display()))
        })?;
        let size = std::fs::metadata(path)?.len();
        Ok(SourceFile {
            path: path.to_path_buf(),
            format,
            size,
        })
    }

    /// Describes a file without touching the disk.
    pub fn new(path: impl Into<PathBuf>, format: FileFormat, size: u64) -> SourceFile {
        SourceFile {
            path: path.into(),
            format,
            size,
        }
    }

    /// File name without its directory, as reported in results
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn describes_files_on_disk() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("Sales.XLSX");
        std::fs::File::create(&path).unwrap().write_all(&[0u8; 12]).unwrap();

        let file = SourceFile::from_path(&path).unwrap();
        assert_eq!(file.format, FileFormat::Xlsx);
        assert_eq!(file.size, 12);
        assert_eq!(file.file_name(), "Sales.XLSX");
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let error = SourceFile::from_path("notes.txt").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn missing_files_are_io_failures() {
        let error = SourceFile::from_path("missing/report.xls").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IoFailure);
    }
}
