//! BIFF12 record reader for the binary parts of .xlsb workbooks.
//! Each record is a 7-bit varint type, a 7-bit varint size and the payload.

use crate::error::ExtractError;
use crate::helpers::bytes::decode_rk;
use crate::helpers::bytes::f64_at;
use crate::helpers::bytes::u16_at;
use crate::helpers::bytes::u32_at;
use crate::helpers::bytes::usize_at;
use encoding_rs::UTF_16LE;
use std::borrow::Cow;
use std::io::BufRead;
use std::io::ErrorKind as IoErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Biff12Error {
    #[error("Not enough data: expect '{0}' bytes, actual '{1}' bytes")]
    NotEnoughData(usize, usize),

    #[error("Record {0} not found before end of part")]
    RecordNotFound(u16),
}

pub(crate) struct Biff12Reader<R: BufRead> {
    reader: R,
    /// Payload of the current record
    pub(crate) buffer: Vec<u8>,
    size: usize,
}

impl<R: BufRead> Biff12Reader<R> {
    pub(crate) fn new(reader: R) -> Biff12Reader<R> {
        Biff12Reader {
            reader,
            buffer: vec![0; 1024],
            size: 0,
        }
    }

    fn record(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    fn short(&self, at: usize, length: usize) -> ExtractError {
        Biff12Error::NotEnoughData(at + length, self.size).into()
    }

    /// Reads a length-prefixed UTF-16 string at `at`, returning it with the offset past it
    pub(crate) fn get_str_and_bound(&'_ self, at: usize) -> Result<(Cow<'_, str>, usize), ExtractError> {
        let chars = usize_at(self.record(), at).ok_or_else(|| self.short(at, 4))?;
        let lower_bound = at + 4;
        let upper_bound = chars
            .checked_mul(2)
            .and_then(|bytes| bytes.checked_add(lower_bound))
            .filter(|upper_bound| *upper_bound <= self.size)
            .ok_or_else(|| self.short(lower_bound, chars.saturating_mul(2)))?;
        let (value, _, _) = UTF_16LE.decode(&self.buffer[lower_bound..upper_bound]);
        Ok((value, upper_bound))
    }

    pub(crate) fn get_str(&'_ self, at: usize) -> Result<Cow<'_, str>, ExtractError> {
        let (data, _) = self.get_str_and_bound(at)?;
        Ok(data)
    }

    pub(crate) fn get_usize(&self, at: usize) -> Result<usize, ExtractError> {
        usize_at(self.record(), at).ok_or_else(|| self.short(at, 4))
    }

    pub(crate) fn get_u16(&self, at: usize) -> Result<u16, ExtractError> {
        u16_at(self.record(), at).ok_or_else(|| self.short(at, 2))
    }

    pub(crate) fn get_u8(&self, at: usize) -> Result<u8, ExtractError> {
        self.record().get(at).copied().ok_or_else(|| self.short(at, 1))
    }

    pub(crate) fn get_f64(&self, at: usize) -> Result<f64, ExtractError> {
        f64_at(self.record(), at).ok_or_else(|| self.short(at, 8))
    }

    pub(crate) fn get_rk(&self, at: usize) -> Result<f64, ExtractError> {
        u32_at(self.record(), at).map(decode_rk).ok_or_else(|| self.short(at, 4))
    }

    /// Style index stored in the low 24 bits at `at`
    pub(crate) fn get_style(&self, at: usize) -> Result<usize, ExtractError> {
        self.get_usize(at).map(|value| value & 0x00FF_FFFF)
    }

    /// Reads a varint of at most `limit` bytes; `None` on a clean end of input
    fn read_7bit_continuation_integer(&mut self, limit: usize) -> Result<Option<usize>, ExtractError> {
        let mut integer = 0usize;
        let mut byte = [0u8; 1];
        for index in 0..limit {
            match self.reader.read_exact(&mut byte) {
                Ok(()) => (),
                Err(error) if index == 0 && error.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
                Err(error) => Err(error)?,
            }
            integer += ((byte[0] & 0x7F) as usize) << (7 * index);
            if (byte[0] & 0x80) == 0 {
                break;
            }
        }
        Ok(Some(integer))
    }

    /// Reads the next record, `None` at end of the part
    pub(crate) fn next(&mut self) -> Result<Option<u16>, ExtractError> {
        let Some(kind) = self.read_7bit_continuation_integer(2)? else {
            return Ok(None);
        };
        let size = self.read_7bit_continuation_integer(4)?.ok_or(Biff12Error::NotEnoughData(1, 0))?;
        if size > self.buffer.len() {
            self.buffer.resize(size, 0);
        }
        self.reader.read_exact(&mut self.buffer[..size])?;
        self.size = size;
        Ok(Some(kind as u16))
    }

    /// Advances to the next `target` record, skipping over `(begin, end)` nested blocks
    pub(crate) fn find_with(&mut self, target: u16, skips: &[(u16, u16)]) -> Result<(), ExtractError> {
        let mut expected = target;
        while let Some(actual) = self.next()? {
            if actual == expected && expected == target {
                return Ok(());
            } else if actual == expected {
                expected = target;
            } else if expected == target {
                if let Some((_, ending)) = skips.iter().find(|(beginning, _)| actual == *beginning) {
                    expected = *ending;
                }
            }
        }
        Err(Biff12Error::RecordNotFound(target))?
    }

    pub(crate) fn find(&mut self, target: u16) -> Result<(), ExtractError> {
        self.find_with(target, &[])
    }
}

#[macro_export]
macro_rules! match_biff12_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}
