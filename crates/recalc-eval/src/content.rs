//! Raw cell-content classification.
//!
//! Every string a caller puts into a cell is first classified here:
//! formula, literal (number / boolean / error), verbatim text, or empty.
//! The engine decides the vertex kind from the outcome.

use recalc_common::{CellError, CellValue, ErrorKind};

use crate::config::Config;

/// What a raw cell string turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Empty,
    Number(f64),
    Boolean(bool),
    Text(String),
    Error(CellError),
    /// Formula body, `=` already stripped.
    Formula(String),
}

impl CellContent {
    /// The literal value of a non-formula classification.
    pub fn into_value(self) -> Option<CellValue> {
        match self {
            CellContent::Empty => Some(CellValue::Empty),
            CellContent::Number(n) => Some(CellValue::Number(n)),
            CellContent::Boolean(b) => Some(CellValue::Boolean(b)),
            CellContent::Text(s) => Some(CellValue::Text(s)),
            CellContent::Error(e) => Some(CellValue::Error(e)),
            CellContent::Formula(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct CellContentParser {
    trim_whitespace: bool,
    currency_symbols: Vec<String>,
}

impl CellContentParser {
    pub fn new(config: &Config) -> Self {
        Self {
            trim_whitespace: config.trim_whitespace,
            currency_symbols: config.currency_symbols.clone(),
        }
    }

    pub fn classify(&self, raw: &str) -> CellContent {
        let content = if self.trim_whitespace {
            raw.trim()
        } else {
            raw
        };
        if content.is_empty() {
            return CellContent::Empty;
        }
        if let Some(body) = content.strip_prefix('=') {
            return CellContent::Formula(body.to_string());
        }
        // leading apostrophe forces verbatim text
        if let Some(rest) = content.strip_prefix('\'') {
            return CellContent::Text(rest.to_string());
        }
        if content.eq_ignore_ascii_case("TRUE") {
            return CellContent::Boolean(true);
        }
        if content.eq_ignore_ascii_case("FALSE") {
            return CellContent::Boolean(false);
        }
        if content.starts_with('#') {
            if let Some(kind) = ErrorKind::parse(content) {
                return CellContent::Error(kind.into());
            }
        }
        if let Some(n) = self.parse_number(content) {
            return CellContent::Number(n);
        }
        CellContent::Text(content.to_string())
    }

    fn parse_number(&self, s: &str) -> Option<f64> {
        let mut body = s;
        let mut percent = false;
        if let Some(stripped) = body.strip_suffix('%') {
            percent = true;
            body = stripped.trim_end();
        }
        let mut negative = false;
        if let Some(stripped) = body.strip_prefix('-') {
            negative = true;
            body = stripped.trim_start();
        }
        for symbol in &self.currency_symbols {
            if let Some(stripped) = body.strip_prefix(symbol.as_str()) {
                body = stripped.trim_start();
                break;
            }
        }
        let mut n: f64 = body.parse().ok()?;
        if !n.is_finite() {
            return None;
        }
        if negative {
            n = -n;
        }
        if percent {
            n /= 100.0;
        }
        Some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CellContentParser {
        CellContentParser::new(&Config::default())
    }

    #[test]
    fn classification() {
        let p = parser();
        assert_eq!(p.classify(""), CellContent::Empty);
        assert_eq!(p.classify("   "), CellContent::Empty);
        assert_eq!(p.classify("1.5"), CellContent::Number(1.5));
        assert_eq!(p.classify("-$3"), CellContent::Number(-3.0));
        assert_eq!(p.classify("50%"), CellContent::Number(0.5));
        assert_eq!(p.classify("true"), CellContent::Boolean(true));
        assert_eq!(
            p.classify("#DIV/0!"),
            CellContent::Error(ErrorKind::Div.into())
        );
        assert_eq!(
            p.classify("=A1+1"),
            CellContent::Formula("A1+1".to_string())
        );
        assert_eq!(p.classify("'=A1"), CellContent::Text("=A1".to_string()));
        assert_eq!(p.classify("hello"), CellContent::Text("hello".to_string()));
        // NaN/inf spellings stay text
        assert_eq!(p.classify("NaN"), CellContent::Text("NaN".to_string()));
        assert_eq!(p.classify("inf"), CellContent::Text("inf".to_string()));
    }
}
