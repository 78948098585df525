//! OLE Compound File Binary (CFB) reader for legacy Excel (.xls) workbooks.
//! Every sector access is bounds-checked so a truncated file fails cleanly.

use crate::error::ExtractError;
use crate::helpers::bytes::u16_at;
use crate::helpers::bytes::u64_at;
use crate::helpers::bytes::usize_at;
use crate::helpers::bytes::usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use thiserror::Error;

const MAX_REG_SECT: usize = 0xFFFFFFFB;
const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;
const MINI_STREAM_CUTOFF: usize = 4096;
const MINI_SECTOR_SIZE: usize = 64;

/// Errors specific to Compound File Binary format parsing
#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormat,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignature,

    #[error("Invalid Sector size '2 ^ {1}' for major version '{0}'")]
    SectorSize(u16, u16),

    #[error("Sector {0} is outside the file")]
    SectorOutOfRange(usize),

    #[error("Sector chain starting at {0} is cyclic")]
    CyclicChain(usize),

    #[error("Empty Root directory")]
    RootDirectory,
}

/// Returns true when `bytes` start with the compound file signature.
pub(crate) fn has_signature(bytes: &[u8]) -> bool {
    u64_at(bytes, 0) == Some(SIGNATURE)
}

/// Compound File Binary structure holding the directory and both allocation tables
pub(crate) struct Cfb {
    directories: HashMap<String, Directory>,
    file_allocation_table: Vec<usize>,
    sectors: Sectors,
    mini_file_allocation_table: Vec<usize>,
    mini_sectors: Sectors,
}

impl Cfb {
    /// Reads and parses the entire compound file
    pub(crate) fn new<RS: Read + Seek>(reader: &mut RS) -> Result<Cfb, ExtractError> {
        let size = reader.seek(SeekFrom::End(0))?;
        if size < 512 {
            Err(CfbError::FileFormat)?;
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut data: Vec<u8> = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data)?;

        let header = Header::new(&data)?;
        let sectors = Sectors { data, size: header.sector_size()? };
        let file_allocation_table = Self::load_file_allocation_table(&sectors, &header)?;
        let directories = Self::load_directories(&file_allocation_table, &sectors, header.directory_start)?;
        let mini_file_allocation_table = if header.mini_table_count > 0 {
            let bytes = read_chain(&file_allocation_table, &sectors, header.mini_table_start)?;
            usize_iter(&bytes).collect()
        } else {
            Vec::new()
        };
        let mini_sectors = match directories.get("Root Entry") {
            Some(root) => {
                let mut data = read_chain(&file_allocation_table, &sectors, root.start)?;
                data.truncate(root.size);
                // Mini sectors have no header block in front of them
                Sectors { data, size: MINI_SECTOR_SIZE }
            }
            None => Sectors { data: Vec::new(), size: MINI_SECTOR_SIZE },
        };

        Ok(Cfb {
            directories,
            file_allocation_table,
            sectors,
            mini_file_allocation_table,
            mini_sectors,
        })
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.directories.contains_key(name)
    }

    /// Reads the contents of a stream, `None` when it does not exist
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ExtractError> {
        let Some(directory) = self.directories.get(name) else {
            return Ok(None);
        };
        let mut bytes = if directory.size < MINI_STREAM_CUTOFF {
            read_chain(&self.mini_file_allocation_table, &self.mini_sectors, directory.start)?
        } else {
            read_chain(&self.file_allocation_table, &self.sectors, directory.start)?
        };
        bytes.truncate(directory.size);
        Ok(Some(bytes))
    }

    /// Builds the file allocation table through the header DIFAT and its extension chain
    fn load_file_allocation_table(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, ExtractError> {
        let header_difat = sectors.data.get(76..512).ok_or(CfbError::FileFormat)?;
        let mut difat: Vec<usize> = usize_iter(header_difat).collect();

        let mut index = header.difat_start;
        let mut visited = 0usize;
        while index < MAX_REG_SECT {
            visited += 1;
            if visited > header.difat_count.max(1) + 1 {
                Err(CfbError::CyclicChain(header.difat_start))?;
            }
            let mut entries: Vec<usize> = usize_iter(sectors.get(index)?).collect();
            index = entries.pop().ok_or(CfbError::FileFormat)?;
            difat.extend(entries);
        }

        let mut file_allocation_table: Vec<usize> = Vec::new();
        for index in difat.into_iter().filter(|index| *index < MAX_REG_SECT).take(header.fat_count) {
            file_allocation_table.extend(usize_iter(sectors.get(index)?));
        }
        Ok(file_allocation_table)
    }

    fn load_directories(file_allocation_table: &[usize], sectors: &Sectors, start: usize) -> Result<HashMap<String, Directory>, ExtractError> {
        let bytes = read_chain(file_allocation_table, sectors, start)?;
        let directories: HashMap<String, Directory> = bytes.chunks_exact(128).filter_map(Directory::new).collect();
        if directories.is_empty() {
            Err(CfbError::RootDirectory)?
        }
        Ok(directories)
    }
}

/// Follows a sector chain, failing on out-of-range sectors and cycles
fn read_chain(table: &[usize], sectors: &Sectors, start: usize) -> Result<Vec<u8>, ExtractError> {
    let mut content: Vec<u8> = Vec::new();
    let mut index = start;
    let mut steps = 0usize;
    while index < MAX_REG_SECT {
        content.extend_from_slice(sectors.get(index)?);
        index = *table.get(index).ok_or(CfbError::SectorOutOfRange(index))?;
        steps += 1;
        if steps > table.len() {
            Err(CfbError::CyclicChain(start))?;
        }
    }
    Ok(content)
}

#[derive(Debug)]
struct Sectors {
    data: Vec<u8>,
    size: usize,
}

impl Sectors {
    /// Data of the sector at `index`; regular sectors are offset by the header block
    fn get(&self, index: usize) -> Result<&[u8], CfbError> {
        let offset = if self.size == MINI_SECTOR_SIZE { 0 } else { 1 };
        let source = index
            .checked_add(offset)
            .and_then(|block| block.checked_mul(self.size))
            .ok_or(CfbError::SectorOutOfRange(index))?;
        if source >= self.data.len() {
            return Err(CfbError::SectorOutOfRange(index));
        }
        let target = self.data.len().min(source + self.size);
        Ok(&self.data[source..target])
    }
}

#[derive(Debug)]
struct Header {
    major_version: u16,
    sector_shift: u16,
    fat_count: usize,
    directory_start: usize,
    mini_table_start: usize,
    mini_table_count: usize,
    difat_start: usize,
    difat_count: usize,
}

impl Header {
    fn new(data: &[u8]) -> Result<Self, CfbError> {
        if !has_signature(data) {
            return Err(CfbError::OleSignature);
        }
        let field = |at: usize| usize_at(data, at).ok_or(CfbError::FileFormat);
        Ok(Header {
            major_version: u16_at(data, 26).ok_or(CfbError::FileFormat)?,
            sector_shift: u16_at(data, 30).ok_or(CfbError::FileFormat)?,
            fat_count: field(44)?,
            directory_start: field(48)?,
            mini_table_start: field(60)?,
            mini_table_count: field(64)?,
            difat_start: field(68)?,
            difat_count: field(72)?,
        })
    }

    fn sector_size(&self) -> Result<usize, CfbError> {
        match (self.major_version, self.sector_shift) {
            (3, 0x0009) => Ok(512),
            (4, 0x000C) => Ok(4096),
            (version, shift) => Err(CfbError::SectorSize(version, shift)),
        }
    }
}

#[derive(Debug)]
struct Directory {
    start: usize,
    size: usize,
}

impl Directory {
    fn new(bytes: &[u8]) -> Option<(String, Directory)> {
        let length = (u16_at(bytes, 64)? as usize).min(64);
        if length == 0 {
            return None;
        }
        let (name, _, _) = UTF_16LE.decode(&bytes[..length]);
        let name = match name.find('\0') {
            Some(position) => name[..position].to_owned(),
            None => name.into_owned(),
        };
        let start = usize_at(bytes, 116)?;
        let size = u64_at(bytes, 120)? as usize;
        Some((name, Directory { start, size }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_input_is_not_a_compound_file() {
        let error = Cfb::new(&mut Cursor::new(vec![0u8; 100])).err().unwrap();
        assert!(matches!(error, ExtractError::Cfb(CfbError::FileFormat)));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut data = vec![0u8; 1024];
        data[0..4].copy_from_slice(b"PK\x03\x04");
        let error = Cfb::new(&mut Cursor::new(data)).err().unwrap();
        assert!(matches!(error, ExtractError::Cfb(CfbError::OleSignature)));
    }

    #[test]
    fn truncated_sectors_fail_without_panicking() {
        let mut data = vec![0u8; 512];
        data[0..8].copy_from_slice(&SIGNATURE.to_le_bytes());
        data[26..28].copy_from_slice(&3u16.to_le_bytes());
        data[30..32].copy_from_slice(&9u16.to_le_bytes());
        data[44..48].copy_from_slice(&1u32.to_le_bytes());
        data[68..72].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());
        // First DIFAT slot points to sector 40, far past the end of the buffer
        data[76..80].copy_from_slice(&40u32.to_le_bytes());
        for slot in 1..109 {
            let at = 76 + slot * 4;
            data[at..at + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        }
        let error = Cfb::new(&mut Cursor::new(data)).err().unwrap();
        assert!(matches!(error, ExtractError::Cfb(CfbError::SectorOutOfRange(40))));
    }

    #[test]
    fn signature_detection() {
        assert!(has_signature(&SIGNATURE.to_le_bytes()));
        assert!(!has_signature(b"PK\x03\x04\x14\x00\x00\x00"));
    }
}
