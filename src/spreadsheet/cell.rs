use crate::spreadsheet::reference::index_to_reference;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeDelta;

/// Types of raw cell data found in workbook parts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CellType {
    #[default]
    Empty,
    Boolean,
    Number,
    /// Date/time values stored as numbers from 1900 epoch
    NumberDateTime1900,
    NumberDate1900,
    NumberTime1900,
    /// Date/time values stored as numbers from 1904 epoch
    NumberDateTime1904,
    NumberDate1904,
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    Text,
    /// Error values, stored as the error literal (`#DIV/0!`)
    Error,
}

impl CellType {
    /// Maps a built-in number format id to a date/time cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Classifies a custom number format string by the date and time tokens it uses
    /// outside of literals, escapes and bracketed sections.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_date = false;
        let mut is_time = false;
        let mut is_color = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' if !is_literal => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_color => is_literal = true,

                ']' if is_color => is_color = false,
                '[' if !is_literal => is_color = true,
                _ if is_literal || is_color => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) => Self::Number,
        }
    }

    /// Whether a numeric cell of this type renders as a date, date-time or time
    pub fn is_date(&self) -> bool {
        matches!(
            self,
            Self::NumberDateTime1900
                | Self::NumberDate1900
                | Self::NumberTime1900
                | Self::NumberDateTime1904
                | Self::NumberDate1904
                | Self::NumberTime1904
        )
    }
}

/// Converts BIFF error codes to their literal.
pub(crate) fn to_error_value(value: u8) -> &'static str {
    match value {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        0x2B => "#GETTING_DATA",
        _ => "#ERROR!",
    }
}

/// Converts an error literal back to its BIFF code.
pub(crate) fn to_error_code(value: &str) -> Option<u8> {
    match value {
        "#NULL!" => Some(0x00),
        "#DIV/0!" => Some(0x07),
        "#VALUE!" => Some(0x0F),
        "#REF!" => Some(0x17),
        "#NAME?" => Some(0x1D),
        "#NUM!" => Some(0x24),
        "#N/A" => Some(0x2A),
        "#GETTING_DATA" => Some(0x2B),
        _ => None,
    }
}

/// One cell as stored in the workbook, before coercion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    pub(crate) kind: CellType,
    /// Raw textual value; for formula cells this is the cached result
    pub(crate) value: String,
    /// Formula text for formula cells. Binary formats only mark the cell as a formula
    /// and leave the text empty.
    pub(crate) formula: Option<String>,
}

impl Cell {
    pub(crate) fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Cell {
        Cell {
            row,
            col,
            kind,
            value: value.into(),
            formula: None,
        }
    }

    pub(crate) fn with_formula(mut self, formula: impl Into<String>) -> Cell {
        self.formula = Some(formula.into());
        self
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn kind(&self) -> CellType {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    /// Excel-style cell reference (e.g. "A1", "B2").
    pub fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }
}

/// Converts an epoch serial to a date-time, honouring the 1900 leap year bug.
/// The time of day is rounded to whole seconds.
pub(crate) fn to_naive_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let offset = if is_1904 {
        1462
    } else if days < 60 {
        1
    } else {
        0
    };
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    NaiveDate::from_ymd_opt(1899, 12, 30)?
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_days(days + offset)?)?
        .checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

/// Inverse of [`to_naive_datetime`].
pub(crate) fn to_serial(datetime: &NaiveDateTime) -> Option<f64> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let elapsed = datetime.signed_duration_since(base);
    let mut days = elapsed.num_days();
    if days < 61 {
        days -= 1;
    }
    let seconds = (elapsed - TimeDelta::try_days(elapsed.num_days())?).num_seconds();
    Some(days as f64 + seconds as f64 / 86_400.0)
}

pub(crate) fn to_date_string(serial: f64, is_1904: bool) -> Option<String> {
    to_naive_datetime(serial, is_1904).map(|datetime| datetime.format("%Y-%m-%d").to_string())
}

pub(crate) fn to_datetime_string(serial: f64, is_1904: bool) -> Option<String> {
    to_naive_datetime(serial, is_1904).map(|datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Renders the fractional day as `HH:MM:SS`.
pub(crate) fn to_time_string(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let total = (serial.fract().abs() * 86_400.0).round() as i64 % 86_400;
    Some(format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_formats() {
        assert_eq!(CellType::parse_builtin_number_format_id("14", false), Some(CellType::NumberDate1900));
        assert_eq!(CellType::parse_builtin_number_format_id("22", true), Some(CellType::NumberDateTime1904));
        assert_eq!(CellType::parse_builtin_number_format_id("46", false), Some(CellType::NumberTime1900));
        assert_eq!(CellType::parse_builtin_number_format_id("2", false), None);
    }

    #[test]
    fn custom_formats() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd hh:mm", false), CellType::NumberDateTime1900);
        assert_eq!(CellType::parse_custom_number_format("hh:mm:ss", true), CellType::NumberTime1904);
        assert_eq!(CellType::parse_custom_number_format("#,##0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00\"days\"", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0\\d", false), CellType::Number);
    }

    #[test]
    fn error_codes_round_trip() {
        for code in [0x00, 0x07, 0x0F, 0x17, 0x1D, 0x24, 0x2A] {
            assert_eq!(to_error_code(to_error_value(code)), Some(code));
        }
        assert_eq!(to_error_code("#SPILL!"), None);
    }

    #[test]
    fn dates_in_both_epochs() {
        assert_eq!(to_date_string(45000.0, false).as_deref(), Some("2023-03-15"));
        assert_eq!(to_date_string(1.0, false).as_deref(), Some("1900-01-01"));
        assert_eq!(to_date_string(61.0, false).as_deref(), Some("1900-03-01"));
        assert_eq!(to_date_string(0.0, true).as_deref(), Some("1904-01-01"));
        assert_eq!(to_datetime_string(45000.75, false).as_deref(), Some("2023-03-15 18:00:00"));
        assert_eq!(to_time_string(0.5).as_deref(), Some("12:00:00"));
        assert_eq!(to_time_string(0.0000116).as_deref(), Some("00:00:01"));
        assert_eq!(to_date_string(-1.0, false), None);
        assert_eq!(to_date_string(f64::NAN, false), None);
    }

    #[test]
    fn serial_inverse() {
        let datetime = NaiveDate::from_ymd_opt(2023, 3, 15).unwrap().and_hms_opt(18, 0, 0).unwrap();
        assert_eq!(to_serial(&datetime), Some(45000.75));
        let datetime = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(to_serial(&datetime), Some(1.0));
    }
}
