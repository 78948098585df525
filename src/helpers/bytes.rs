//! Little-endian field access over raw record and sector buffers.
//! Every accessor is bounds-checked and yields `None` past the end of the slice.

#[inline]
fn array_at<const N: usize>(bytes: &[u8], at: usize) -> Option<[u8; N]> {
    bytes.get(at..at.checked_add(N)?)?.try_into().ok()
}

#[inline]
pub(crate) fn u16_at(bytes: &[u8], at: usize) -> Option<u16> {
    array_at(bytes, at).map(u16::from_le_bytes)
}

#[inline]
pub(crate) fn u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    array_at(bytes, at).map(u32::from_le_bytes)
}

#[inline]
pub(crate) fn u64_at(bytes: &[u8], at: usize) -> Option<u64> {
    array_at(bytes, at).map(u64::from_le_bytes)
}

#[inline]
pub(crate) fn f64_at(bytes: &[u8], at: usize) -> Option<f64> {
    array_at(bytes, at).map(f64::from_le_bytes)
}

#[inline]
pub(crate) fn usize_at(bytes: &[u8], at: usize) -> Option<usize> {
    u32_at(bytes, at).map(|value| value as usize)
}

/// Splits a buffer into consecutive 32-bit values, ignoring a trailing partial chunk.
pub(crate) fn usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
}

/// Decodes an RK number: a 30-bit integer or the high 30 bits of an IEEE double,
/// optionally divided by 100.
pub(crate) fn decode_rk(raw: u32) -> f64 {
    let is_percentage = (raw & 0x01) != 0;
    let is_integer = (raw & 0x02) != 0;
    let value = if is_integer {
        ((raw as i32) >> 2) as f64
    } else {
        f64::from_bits(((raw & 0xFFFF_FFFC) as u64) << 32)
    };
    if is_percentage {
        value / 100.0
    } else {
        value
    }
}
