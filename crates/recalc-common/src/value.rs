//! The value a cell evaluates to.

use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use crate::error::CellError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A computed cell value.
///
/// Numbers are IEEE-754 doubles; equality and hashing follow spreadsheet
/// semantics (bitwise for numbers, so every NaN produced by error
/// propagation hashes the same and stays distinct from `Error`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Empty,
    Error(CellError),
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            CellValue::Number(n) => {
                state.write_u8(0);
                n.to_bits().hash(state);
            }
            CellValue::Text(s) => {
                state.write_u8(1);
                s.hash(state);
            }
            CellValue::Boolean(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            CellValue::Empty => state.write_u8(3),
            CellValue::Error(e) => {
                state.write_u8(4);
                e.hash(state);
            }
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{}", format_number(*n)),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Empty => Ok(()),
            CellValue::Error(e) => write!(f, "{}", e.kind),
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
        CellValue::Boolean(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}

impl CellValue {
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// The contained error, if any.
    pub fn as_error(&self) -> Option<&CellError> {
        match self {
            CellValue::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Canonical number rendering: integral doubles print without a fraction.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
