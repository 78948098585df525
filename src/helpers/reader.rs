use std::fs::File;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::path::Path;

/// Byte source behind every container reader.
pub(crate) enum SourceReader {
    /// Buffered stream over the file on disk.
    Stream(BufReader<File>),
    /// Whole file held in an owned buffer, released when the reader is dropped.
    Buffered(Cursor<Vec<u8>>),
}

impl SourceReader {
    /// Opens a plain buffered stream.
    pub(crate) fn stream(path: &Path) -> std::io::Result<SourceReader> {
        let file = File::open(path)?;
        Ok(SourceReader::Stream(BufReader::new(file)))
    }

    /// Reads the whole file into memory.
    pub(crate) fn buffered(path: &Path) -> std::io::Result<SourceReader> {
        let bytes = std::fs::read(path)?;
        Ok(SourceReader::Buffered(Cursor::new(bytes)))
    }

    /// Prefers the in-memory path for files above `threshold`, falling back to a stream
    /// when the file cannot be buffered.
    pub(crate) fn open(path: &Path, size: u64, buffered: bool, threshold: u64) -> std::io::Result<SourceReader> {
        if buffered && size > threshold {
            match Self::buffered(path) {
                Ok(reader) => return Ok(reader),
                Err(error) => log::warn!(
                    "Buffered read of '{}' failed, using a stream instead: {}",
                    path.display(),
                    error
                ),
            }
        }
        Self::stream(path)
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> SourceReader {
        SourceReader::Buffered(Cursor::new(bytes))
    }

    pub(crate) fn is_buffered(&self) -> bool {
        matches!(self, SourceReader::Buffered(_))
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SourceReader::Stream(reader) => reader.read(buf),
            SourceReader::Buffered(reader) => reader.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        match self {
            SourceReader::Stream(reader) => reader.seek(pos),
            SourceReader::Buffered(reader) => reader.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn large_files_are_buffered() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 64]).unwrap();

        let reader = SourceReader::open(file.path(), 64, true, 16).unwrap();
        assert!(reader.is_buffered());

        let reader = SourceReader::open(file.path(), 64, true, 128).unwrap();
        assert!(!reader.is_buffered());

        let reader = SourceReader::open(file.path(), 64, false, 16).unwrap();
        assert!(!reader.is_buffered());
    }

    #[test]
    fn missing_file_fails() {
        assert!(SourceReader::open(Path::new("missing/never.xlsx"), 0, true, 0).is_err());
    }

    #[test]
    fn both_variants_read_the_same_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04rest").unwrap();
        for buffered in [true, false] {
            let mut reader = SourceReader::open(file.path(), 8, buffered, 0).unwrap();
            let mut content = Vec::new();
            reader.read_to_end(&mut content).unwrap();
            assert_eq!(content, b"PK\x03\x04rest");
        }
    }
}
