//! Boundary representation of computed values.
//!
//! Callers outside the engine see exported values: plain Rust data with
//! errors flattened to their display codes, suitable for UI grids and
//! serialization.

use recalc_common::CellValue;

#[derive(Debug, Clone, PartialEq)]
pub enum ExportedValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Empty,
    /// The spreadsheet error code (`#DIV/0!`, ...) plus optional detail.
    Error { code: String, detail: Option<String> },
}

impl From<&CellValue> for ExportedValue {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Number(n) => ExportedValue::Number(*n),
            CellValue::Text(s) => ExportedValue::Text(s.clone()),
            CellValue::Boolean(b) => ExportedValue::Boolean(*b),
            CellValue::Empty => ExportedValue::Empty,
            CellValue::Error(e) => ExportedValue::Error {
                code: e.kind.to_string(),
                detail: e.message.clone(),
            },
        }
    }
}

impl From<CellValue> for ExportedValue {
    fn from(value: CellValue) -> Self {
        (&value).into()
    }
}

impl crate::engine::Engine {
    /// The exported value of a cell; triggers a pending recompute like any
    /// other read.
    pub fn get_exported_value(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
    ) -> Result<ExportedValue, crate::engine::EngineError> {
        Ok(self.get_cell_value(sheet, row, col)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recalc_common::ErrorKind;

    #[test]
    fn errors_flatten_to_codes() {
        let v = CellValue::Error(
            recalc_common::CellError::new(ErrorKind::Div).with_message("denominator B2"),
        );
        assert_eq!(
            ExportedValue::from(&v),
            ExportedValue::Error {
                code: "#DIV/0!".to_string(),
                detail: Some("denominator B2".to_string()),
            }
        );
        assert_eq!(
            ExportedValue::from(&CellValue::Number(1.5)),
            ExportedValue::Number(1.5)
        );
    }
}
