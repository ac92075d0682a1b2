//! Cell-plane error representation.
//!
//! - **`ErrorKind`**: the canonical set of spreadsheet error codes
//! - **`CellError`**: kind plus an optional human explanation
//!
//! Cell errors are *data*: they live inside [`CellValue::Error`] and flow
//! through formula evaluation rather than aborting it.
//!
//! [`CellValue::Error`]: crate::value::CellValue::Error

use std::{error::Error, fmt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All recognised spreadsheet error codes.
///
/// Names are CamelCase while `Display` renders them the way a sheet shows
/// them (`#DIV/0!`, ...).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cycle,
    Div,
    Value,
    Ref,
    Name,
    Num,
    Na,
    Error,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cycle => "#CYCLE!",
            Self::Div => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Na => "#N/A",
            Self::Error => "#ERROR!",
        })
    }
}

impl ErrorKind {
    /// Parses a spreadsheet error literal (`#REF!`, `#div/0!`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "#CYCLE!" => Some(Self::Cycle),
            "#DIV/0!" => Some(Self::Div),
            "#VALUE!" => Some(Self::Value),
            "#REF!" => Some(Self::Ref),
            "#NAME?" => Some(Self::Name),
            "#NUM!" => Some(Self::Num),
            "#N/A" => Some(Self::Na),
            "#ERROR!" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The error value a cell can hold.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl From<ErrorKind> for CellError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl CellError {
    pub fn new(kind: ErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for CellError {}
