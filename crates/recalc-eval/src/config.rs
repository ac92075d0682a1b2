//! Engine configuration.

use std::fmt;

use chrono::NaiveDate;
use recalc_common::CellValue;
use rustc_hash::FxHashMap;

/// Configuration for an [`Engine`](crate::engine::Engine).
///
/// Values are validated once, at engine construction; a violation aborts the
/// build with [`ConfigError`] before any state exists.
#[derive(Debug, Clone)]
pub struct Config {
    /// Permit formula cycles and evaluate them with seeded sweeps instead of
    /// flagging `#CYCLE!`.
    pub allow_circular_references: bool,
    /// Previously computed values, keyed by sheet name. Consulted only when
    /// `allow_circular_references` is on: a cycle member whose address has a
    /// seed starts from it instead of being recomputed.
    pub initial_computed_values: FxHashMap<String, Vec<Vec<CellValue>>>,
    /// Upper bound on rows per sheet; exceeding it is an operation error.
    pub max_rows: u32,
    /// Upper bound on columns per sheet.
    pub max_columns: u32,
    /// Collect phase timings and counters.
    pub use_stats: bool,
    /// Maximum number of in-place sweeps over a tolerated cycle before its
    /// current values are accepted.
    pub cycle_iteration_limit: u32,
    /// Occupancy ratio above which a bulk-built sheet gets dense cell
    /// storage.
    pub dense_mapping_threshold: f64,
    /// Maintain a value index per column for lookup functions.
    pub use_column_index: bool,
    /// Treat empty cells as zero in arithmetic.
    pub empty_value_is_zero: bool,
    /// Trim surrounding whitespace when classifying raw cell content.
    pub trim_whitespace: bool,
    /// Case-sensitive text comparison in formulas.
    pub case_sensitive_comparison: bool,
    /// Elementwise arithmetic over array operands; when off, an array
    /// operand of a scalar operator is a `#VALUE!` error.
    pub array_arithmetic: bool,
    /// Prefix for generated sheet names (`Sheet1`, `Sheet2`, ...).
    pub new_sheet_prefix: String,
    /// Accepted date formats for content classification, in precedence
    /// order.
    pub date_formats: Vec<String>,
    /// Currency symbols stripped during number classification.
    pub currency_symbols: Vec<String>,
    /// BCP-47 locale tag, passed through to collation-sensitive functions.
    pub locale: String,
    /// Reproduce the 1900 leap-year quirk in date serial numbers.
    pub leap_year_1900: bool,
    /// Day zero of the date serial scale.
    pub null_date: NaiveDate,
    /// Two-digit years at or below this value land in the 2000s.
    pub null_year: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_circular_references: false,
            initial_computed_values: FxHashMap::default(),
            max_rows: 40_000,
            max_columns: 18_278,
            use_stats: false,
            cycle_iteration_limit: 100,
            dense_mapping_threshold: 0.8,
            use_column_index: false,
            empty_value_is_zero: true,
            trim_whitespace: true,
            case_sensitive_comparison: false,
            array_arithmetic: true,
            new_sheet_prefix: "Sheet".to_string(),
            date_formats: vec!["DD/MM/YYYY".to_string(), "DD/MM/YY".to_string()],
            currency_symbols: vec!["$".to_string()],
            locale: "en".to_string(),
            leap_year_1900: false,
            null_date: NaiveDate::from_ymd_opt(1899, 12, 30).unwrap(),
            null_year: 30,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rows == 0 {
            return Err(ConfigError::OutOfRange {
                option: "max_rows",
                detail: "must be at least 1",
            });
        }
        if self.max_columns == 0 {
            return Err(ConfigError::OutOfRange {
                option: "max_columns",
                detail: "must be at least 1",
            });
        }
        if self.cycle_iteration_limit == 0 {
            return Err(ConfigError::OutOfRange {
                option: "cycle_iteration_limit",
                detail: "must be at least 1",
            });
        }
        if !(0.0..=1.0).contains(&self.dense_mapping_threshold) {
            return Err(ConfigError::OutOfRange {
                option: "dense_mapping_threshold",
                detail: "must lie in 0.0..=1.0",
            });
        }
        if self.null_year > 99 {
            return Err(ConfigError::OutOfRange {
                option: "null_year",
                detail: "must lie in 0..=99",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    OutOfRange {
        option: &'static str,
        detail: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange { option, detail } => {
                write!(f, "config option '{option}' {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
