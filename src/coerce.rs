//! Maps raw cells onto the canonical [`CellValue`].
//!
//! Coercion never fails: a cell that cannot be read becomes the
//! [`ERROR_READING_CELL`] sentinel so one bad cell never aborts a row or a sheet.

use crate::error::ExtractError;
use crate::spreadsheet::cell::to_date_string;
use crate::spreadsheet::cell::to_datetime_string;
use crate::spreadsheet::cell::to_error_code;
use crate::spreadsheet::cell::to_time_string;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Display;

/// Value of a formula cell whose cached result is an error
pub const FORMULA_RESULT_ERROR: &str = "#ERROR";
/// Value of a formula cell with neither a readable result nor formula text
pub const FORMULA_ERROR: &str = "#FORMULA_ERROR";
/// Value of a cell that could not be read at all
pub const ERROR_READING_CELL: &str = "#ERROR_READING_CELL";

/// Canonical cell value. Serializes as the plain JSON value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    String(String),
    Int(i64),
    Float(f64),
    /// A date, date-time or time rendered as text
    Date(String),
}

impl CellValue {
    /// True for `Null` and for text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(text) | CellValue::Date(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view used by aggregations
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(value) => Some(*value as f64),
            CellValue::Float(value) => Some(*value),
            _ => None,
        }
    }
}

/// String form: whole floats print without a fraction or exponent, `Null` is empty.
impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(value) => write!(f, "{value}"),
            CellValue::String(text) | CellValue::Date(text) => f.write_str(text),
            CellValue::Int(value) => write!(f, "{value}"),
            CellValue::Float(value) if value.is_finite() && value.fract() == 0.0 => write!(f, "{value:.0}"),
            CellValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_owned())
    }
}

/// Coerces one cell, `None` standing for a cell that is not stored at all.
pub fn coerce(cell: Option<&Cell>) -> CellValue {
    let Some(cell) = cell else {
        return CellValue::Null;
    };
    if let Some(formula) = cell.formula() {
        return coerce_formula(cell, formula);
    }
    match coerce_value(cell.kind(), cell.value()) {
        Ok(value) => value,
        Err(error) => {
            log::debug!("Cannot read cell {}: {}", cell.reference(), error);
            CellValue::String(ERROR_READING_CELL.to_owned())
        }
    }
}

/// String form of a cell, as used for header names
pub fn string_form(cell: Option<&Cell>) -> String {
    coerce(cell).to_string()
}

/// Coerces the cached result of a formula cell, falling back to the formula text.
fn coerce_formula(cell: &Cell, formula: &str) -> CellValue {
    let fallback = || {
        if formula.is_empty() {
            CellValue::String(FORMULA_ERROR.to_owned())
        } else {
            CellValue::String(format!("={formula}"))
        }
    };
    match cell.kind() {
        CellType::Error => CellValue::String(FORMULA_RESULT_ERROR.to_owned()),
        CellType::Empty if formula.is_empty() => CellValue::String(FORMULA_ERROR.to_owned()),
        CellType::Empty => CellValue::String(formula.to_owned()),
        kind => coerce_value(kind, cell.value()).unwrap_or_else(|_| fallback()),
    }
}

fn coerce_value(kind: CellType, value: &str) -> Result<CellValue, ExtractError> {
    let coerced = match kind {
        CellType::Empty => CellValue::Null,
        CellType::Text => CellValue::String(value.to_owned()),
        CellType::Boolean => CellValue::Bool(value == "1" || value.eq_ignore_ascii_case("true")),
        CellType::Number => number(value.trim().parse::<f64>()?),
        CellType::NumberDate1900 | CellType::NumberDate1904 => {
            let serial = value.trim().parse::<f64>()?;
            CellValue::Date(to_date_string(serial, kind == CellType::NumberDate1904).ok_or_else(|| out_of_range(value))?)
        }
        CellType::NumberDateTime1900 | CellType::NumberDateTime1904 => {
            let serial = value.trim().parse::<f64>()?;
            CellValue::Date(to_datetime_string(serial, kind == CellType::NumberDateTime1904).ok_or_else(|| out_of_range(value))?)
        }
        CellType::NumberTime1900 | CellType::NumberTime1904 => {
            let serial = value.trim().parse::<f64>()?;
            CellValue::Date(to_time_string(serial).ok_or_else(|| out_of_range(value))?)
        }
        CellType::IsoDateTime => iso_datetime(value),
        CellType::Error => {
            let code = to_error_code(value).map(|code| code.to_string());
            CellValue::String(format!("#ERROR:{}", code.as_deref().unwrap_or(value)))
        }
    };
    Ok(coerced)
}

/// Integral finite values within the i64 range become `Int`
fn number(value: f64) -> CellValue {
    if value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        CellValue::Int(value as i64)
    } else {
        CellValue::Float(value)
    }
}

fn iso_datetime(value: &str) -> CellValue {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        if datetime.time() == chrono::NaiveTime::MIN {
            CellValue::Date(datetime.format("%Y-%m-%d").to_string())
        } else {
            CellValue::Date(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
        }
    } else if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        CellValue::Date(date.format("%Y-%m-%d").to_string())
    } else {
        CellValue::String(value.to_owned())
    }
}

fn out_of_range(value: &str) -> ExtractError {
    ExtractError::CellRead(format!("Date serial '{value}' is out of range"))
}
