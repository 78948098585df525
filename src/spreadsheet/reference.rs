//! A1-style cell references.

use regex::Regex;
use std::sync::OnceLock;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([1-9][0-9]{0,6})$").expect("valid reference pattern"))
}

/// Converts zero-based indexes to a reference such as `AB12`.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    let mut letters = Vec::new();
    let mut col = col + 1;
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    format!("{}{}", String::from_utf8_lossy(&letters), row + 1)
}

/// Parses a reference such as `AB12` into zero-based `(row, col)`.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let captures = reference_pattern().captures(reference)?;
    let col = captures[1]
        .bytes()
        .fold(0usize, |col, byte| col * 26 + (byte.to_ascii_uppercase() - b'A') as usize + 1);
    let row = captures[2].parse::<usize>().ok()?;
    Some((row - 1, col - 1))
}
