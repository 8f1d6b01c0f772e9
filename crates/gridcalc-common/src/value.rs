use core::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// The stored type of a cell, as reported to callers.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CellType {
    Empty,
    Numeric,
    String,
    EditText,
    Formula,
}

/// A computed or literal value as seen by readers and by the interpreter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(Arc<str>),
    Bool(bool),
    Error(ErrorKind),
}

impl CellValue {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        CellValue::Text(s.into())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn as_error(&self) -> Option<ErrorKind> {
        match self {
            CellValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Numeric coercion used by arithmetic operators.
    ///
    /// Empty is zero, booleans are 0/1, text must parse as a number.
    pub fn to_number(&self) -> Result<f64, ErrorKind> {
        match self {
            CellValue::Empty => Ok(0.0),
            CellValue::Number(n) => Ok(*n),
            CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Err(ErrorKind::Value);
                }
                t.parse::<f64>().map_err(|_| ErrorKind::Value)
            }
            CellValue::Error(e) => Err(*e),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ErrorKind> {
        match self {
            CellValue::Empty => Ok(false),
            CellValue::Number(n) => Ok(*n != 0.0),
            CellValue::Bool(b) => Ok(*b),
            CellValue::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Ok(false)
                } else {
                    Err(ErrorKind::Value)
                }
            }
            CellValue::Error(e) => Err(*e),
        }
    }

    /// Text coercion used by `&` and text functions.
    pub fn to_text(&self) -> Result<String, ErrorKind> {
        match self {
            CellValue::Empty => Ok(String::new()),
            CellValue::Number(n) => Ok(format_number(*n)),
            CellValue::Text(s) => Ok(s.to_string()),
            CellValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            CellValue::Error(e) => Err(*e),
        }
    }

    /// Bit-exact equality (NaN-safe, `-0.0 != 0.0`), used to compare results
    /// produced by different scheduling strategies.
    pub fn bit_eq(&self, other: &CellValue) -> bool {
        match (self, other) {
            (CellValue::Number(a), CellValue::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Error(e) => write!(f, "{e}"),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(Arc::from(s))
    }
}

impl From<ErrorKind> for CellValue {
    fn from(e: ErrorKind) -> Self {
        CellValue::Error(e)
    }
}

/// General-format rendering of a number: integers without a fraction,
/// everything else with at most 15 significant digits.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return ErrorKind::Num.code().to_string();
    }
    if n.is_infinite() {
        return ErrorKind::Div0.code().to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let magnitude = n.abs().log10().floor() as i32;
    if !(-5..15).contains(&magnitude) {
        let s = format!("{:.*E}", 14, n);
        return trim_exponent(&s);
    }
    let decimals = (14 - magnitude).clamp(0, 15) as usize;
    let s = format!("{:.*}", decimals, n);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn trim_exponent(s: &str) -> String {
    match s.split_once('E') {
        Some((mantissa, exp)) => {
            let mantissa = if mantissa.contains('.') {
                mantissa.trim_end_matches('0').trim_end_matches('.')
            } else {
                mantissa
            };
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{mantissa}E{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs())
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(-3.5), "-3.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(1.0 / 3.0), "0.333333333333333");
        assert_eq!(format_number(1e20), "1E+20");
    }

    #[test]
    fn coercions() {
        assert_eq!(CellValue::Empty.to_number(), Ok(0.0));
        assert_eq!(CellValue::text(" 4.5 ").to_number(), Ok(4.5));
        assert_eq!(CellValue::text("abc").to_number(), Err(ErrorKind::Value));
        assert_eq!(CellValue::Bool(true).to_text(), Ok("TRUE".to_string()));
        assert_eq!(
            CellValue::Error(ErrorKind::Ref).to_bool(),
            Err(ErrorKind::Ref)
        );
    }

    #[test]
    fn bit_equality_distinguishes_signed_zero() {
        assert!(!CellValue::Number(0.0).bit_eq(&CellValue::Number(-0.0)));
        assert!(CellValue::Number(f64::NAN).bit_eq(&CellValue::Number(f64::NAN)));
    }
}
