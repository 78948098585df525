//! Binary Interchange File Format (BIFF8) record reader for .xls workbook streams.
//! Records may be split across CONTINUE records; reads transparently cross those seams.

use crate::error::ExtractError;
use crate::helpers::bytes::decode_rk;
use crate::helpers::bytes::f64_at;
use crate::helpers::bytes::u16_at;
use crate::helpers::bytes::u32_at;
use crate::helpers::bytes::u64_at;
use encoding_rs::Encoding;
use thiserror::Error;

const CONTINUE: u16 = 60;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in record")]
    NotEnoughData(usize),
}

/// Reader over a BIFF8 workbook stream
pub(crate) struct Biff8Reader {
    /// Encoding of uncompressed strings, updated by the CODEPAGE record
    pub(crate) encoding: &'static Encoding,
    buffer: Vec<u8>,
    /// Position of the next record header
    pointer: usize,
    /// Byte ranges of the current record and its CONTINUE records
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(data: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: encoding_rs::UTF_16LE,
            buffer: data,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Moves to the next record and returns its type, `None` at end of stream
    pub(crate) fn next(&mut self) -> Result<Option<u16>, ExtractError> {
        if self.pointer + 4 > self.buffer.len() {
            return Ok(None);
        }
        self.index = 0;
        self.offset = 0;
        self.chunks.clear();

        let kind = self.get_u16_at(self.pointer)?;
        self.push_chunk()?;
        while self.pointer + 4 <= self.buffer.len() && self.get_u16_at(self.pointer)? == CONTINUE {
            self.push_chunk()?;
        }
        Ok(Some(kind))
    }

    /// Type of the next record without moving to it
    pub(crate) fn peek(&self) -> Result<Option<u16>, ExtractError> {
        if self.pointer + 4 > self.buffer.len() {
            return Ok(None);
        }
        self.get_u16_at(self.pointer).map(Some)
    }

    fn push_chunk(&mut self) -> Result<(), ExtractError> {
        let size = self.get_u16_at(self.pointer + 2)? as usize;
        let lower = self.pointer + 4;
        let upper = (lower + size).min(self.buffer.len());
        self.pointer = lower + size;
        self.chunks.push((lower, upper));
        Ok(())
    }

    /// Positions the reader at an absolute stream offset (a BOF record)
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
    }

    /// Reads up to `length` bytes from the current chunk only
    fn read(&mut self, length: usize) -> &[u8] {
        if let Some((lower, upper)) = self.chunks.get(self.index).copied() {
            let source = upper.min(lower + self.offset);
            let target = upper.min(source + length);
            if source < upper {
                if target == upper {
                    self.index += 1;
                    self.offset = 0;
                } else {
                    self.offset += target - source;
                }
                return &self.buffer[source..target];
            }
        }
        &[]
    }

    fn read_exact(&mut self, length: usize) -> Result<&[u8], ExtractError> {
        let data = self.read(length);
        if data.len() == length {
            Ok(data)
        } else {
            Err(Biff8Error::NotEnoughData(length))?
        }
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), ExtractError> {
        let mut remaining = length;
        while remaining > 0 {
            let size = self.read(remaining).len();
            if size == 0 {
                Err(Biff8Error::NotEnoughData(length))?;
            }
            remaining -= size;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ExtractError> {
        self.read_exact(1).map(|data| data[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, ExtractError> {
        let data = self.read_exact(2)?;
        Ok(u16_at(data, 0).unwrap_or_default())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ExtractError> {
        let data = self.read_exact(4)?;
        Ok(u32_at(data, 0).unwrap_or_default())
    }

    pub(crate) fn read_usize(&mut self) -> Result<usize, ExtractError> {
        self.read_u32().map(|value| value as usize)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, ExtractError> {
        let data = self.read_exact(8)?;
        Ok(u64_at(data, 0).unwrap_or_default())
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, ExtractError> {
        let data = self.read_exact(8)?;
        Ok(f64_at(data, 0).unwrap_or_default())
    }

    pub(crate) fn read_rk(&mut self) -> Result<f64, ExtractError> {
        self.read_u32().map(decode_rk)
    }

    /// Reads a u16 counted back from the end of the current record
    pub(crate) fn get_u16_back(&self, offset: usize) -> Result<u16, ExtractError> {
        let mut offset = offset;
        for (lower, upper) in self.chunks.iter().rev() {
            if *lower + offset <= *upper {
                return self.get_u16_at(*upper - offset);
            }
            offset -= *upper - *lower;
        }
        Err(Biff8Error::NotEnoughData(2))?
    }

    fn get_u16_at(&self, index: usize) -> Result<u16, ExtractError> {
        Ok(u16_at(&self.buffer, index).ok_or(Biff8Error::NotEnoughData(2))?)
    }

    /// ShortXLUnicodeString: 1-byte character count
    pub(crate) fn read_short_xl_unicode_string(&mut self) -> Result<String, ExtractError> {
        let mut string = String::new();
        let chars = self.read_u8()? as usize;
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeString: 2-byte character count
    pub(crate) fn read_xl_unicode_string(&mut self) -> Result<String, ExtractError> {
        let mut string = String::new();
        let chars = self.read_u16()? as usize;
        let (mut actual, _) = self.read_string_into(chars, false, &mut string)?;
        while actual < chars && self.index < self.chunks.len() {
            actual += self.read_string_into(chars - actual, false, &mut string)?.0;
        }
        Ok(string)
    }

    /// XLUnicodeRichExtendedString as stored in the shared string table
    pub(crate) fn read_xl_unicode_rich_extended_string(&mut self) -> Result<String, ExtractError> {
        let mut string = String::new();
        let chars = self.read_u16()? as usize;
        let (mut actual, trailing) = self.read_string_into(chars, true, &mut string)?;
        while actual < chars {
            let (size, _) = self.read_string_into(chars - actual, false, &mut string)?;
            if size == 0 {
                Err(Biff8Error::NotEnoughData(chars - actual))?;
            }
            actual += size;
        }
        // Formatting runs and phonetic data follow the complete character array
        self.skip(trailing)?;
        Ok(string)
    }

    /// Reads one string segment (up to the end of the current chunk). Returns the number
    /// of characters consumed and the size of the formatting data trailing the string.
    /// A string continued in the next CONTINUE record restarts with a fresh flags byte.
    fn read_string_into(&mut self, chars: usize, is_extend: bool, content: &mut String) -> Result<(usize, usize), ExtractError> {
        let encoding = self.encoding;
        let flag = self.read_u8()?;
        let is_high_byte = (flag & 0x1) > 0;
        let rich_runs = if is_extend && (flag & 0x8) > 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic_size = if is_extend && (flag & 0x4) > 0 {
            self.read_usize()?
        } else {
            0
        };
        let expected = if is_high_byte { chars << 1 } else { chars };
        let bytes = self.read(expected);
        let actual = if is_high_byte { bytes.len() >> 1 } else { bytes.len() };
        if is_high_byte {
            let (string, _, _) = encoding.decode(bytes);
            content.push_str(&string);
        } else {
            // Compressed strings hold the low byte of each UTF-16 code unit
            content.extend(bytes.iter().map(|byte| *byte as char));
        }
        Ok((actual, 4 * rich_runs + phonetic_size))
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}
