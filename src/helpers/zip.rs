//! ZIP archive helpers for the OOXML containers (.xlsx, .xlsb).
//! Entry lookup is case-insensitive, and every opened entry is checked against the
//! configured [`ArchiveLimits`].

use crate::config::ArchiveLimits;
use crate::error::ExtractError;
use crate::helpers::biff12::Biff12Reader;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use thiserror::Error;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive entry '{0}' expands to {1} bytes, more than the {2} byte limit")]
    EntryTooLarge(String, u64, u64),

    #[error("Archive entry '{0}' has compression ratio {1:.6}, below the {2} minimum (possible zip bomb)")]
    InflateRatio(String, f64, f64),
}

/// Rejects entries outside the configured size and compression ratio limits.
pub(crate) fn check_limits(name: &str, compressed: u64, size: u64, limits: &ArchiveLimits) -> Result<(), ArchiveError> {
    if size > limits.max_entry_size {
        return Err(ArchiveError::EntryTooLarge(name.to_owned(), size, limits.max_entry_size));
    }
    if size > 0 {
        let ratio = compressed as f64 / size as f64;
        if ratio < limits.min_inflate_ratio {
            return Err(ArchiveError::InflateRatio(name.to_owned(), ratio, limits.min_inflate_ratio));
        }
    }
    Ok(())
}

/// Helper trait for ZIP archive operations with specialized reader creation
pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Case-insensitive lookup of the stored entry name
    fn find_name(&self, name: &str) -> Option<String>;

    /// Gets an entry by name, enforcing `limits` before any byte is inflated
    fn file(&'_ mut self, name: &str, limits: &ArchiveLimits) -> Result<Option<ZipFile<'_, RS>>, ExtractError>;

    fn xml_reader(
        &'_ mut self,
        name: &str,
        limits: &ArchiveLimits,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, ExtractError>;

    fn biff_reader(
        &'_ mut self,
        name: &str,
        limits: &ArchiveLimits,
    ) -> Result<Option<Biff12Reader<BufReader<ZipFile<'_, RS>>>>, ExtractError>;

    /// Names of all entries under `prefix` (case-insensitive)
    fn names_with_prefix(&self, prefix: &str) -> Vec<String>;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn find_name(&self, name: &str) -> Option<String> {
        let pattern = name.replace('\\', "/");
        self.file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(file_name))
            .map(|file_name| file_name.to_owned())
    }

    fn file(&'_ mut self, name: &str, limits: &ArchiveLimits) -> Result<Option<ZipFile<'_, RS>>, ExtractError> {
        let path = self.find_name(name);
        match path.map(|file_name| self.by_name(&file_name)).transpose() {
            Ok(Some(file)) => {
                check_limits(file.name(), file.compressed_size(), file.size(), limits)?;
                Ok(Some(file))
            }
            Ok(None) | Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    fn xml_reader(
        &'_ mut self,
        name: &str,
        limits: &ArchiveLimits,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, ExtractError> {
        let reader = self
            .file(name, limits)?
            .map(|file| XmlReader::new(BufReader::new(file)));
        Ok(reader)
    }

    fn biff_reader(
        &'_ mut self,
        name: &str,
        limits: &ArchiveLimits,
    ) -> Result<Option<Biff12Reader<BufReader<ZipFile<'_, RS>>>>, ExtractError> {
        let reader = self
            .file(name, limits)?
            .map(|file| Biff12Reader::new(BufReader::new(file)));
        Ok(reader)
    }

    fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_ascii_lowercase();
        self.file_names()
            .filter(|name| name.to_ascii_lowercase().starts_with(&prefix))
            .map(|name| name.to_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;
    use zip::ZipWriter;

    fn archive(entries: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        ZipArchive::new(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn lookup_ignores_case_and_separators() {
        let mut zip = archive(&[("xl/Workbook.xml", b"<workbook/>")]);
        let limits = ArchiveLimits::default();
        assert!(zip.file("XL\\workbook.XML", &limits).unwrap().is_some());
        assert!(zip.file("xl/missing.xml", &limits).unwrap().is_none());
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let mut zip = archive(&[("xl/big.xml", &[b'a'; 2048])]);
        let limits = ArchiveLimits { min_inflate_ratio: 0.0, max_entry_size: 1024 };
        let error = zip.file("xl/big.xml", &limits).map(|_| ()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::CorruptArchive);
    }

    #[test]
    fn highly_compressed_entries_respect_the_ratio() {
        let content = vec![b' '; 1 << 20];
        let mut zip = archive(&[("xl/sheet.xml", &content)]);

        let strict = ArchiveLimits { min_inflate_ratio: 0.01, max_entry_size: u64::MAX };
        assert!(zip.file("xl/sheet.xml", &strict).is_err());
        assert!(zip.file("xl/sheet.xml", &ArchiveLimits::default()).unwrap().is_some());
    }

    #[test]
    fn prefix_listing() {
        let zip = archive(&[
            ("xl/pivotCache/pivotCacheDefinition1.xml", b"<a/>"),
            ("xl/pivotCache/pivotCacheRecords1.xml", b"<a/>"),
            ("xl/workbook.xml", b"<a/>"),
        ]);
        assert_eq!(zip.names_with_prefix("xl/PivotCache/").len(), 2);
    }
}
