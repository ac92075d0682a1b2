//! recalc-eval: an incremental spreadsheet evaluation engine.
//!
//! The engine ingests raw sheets, maintains a typed dependency graph over
//! cells, ranges and named expressions, and recomputes only the dirty
//! closure on demand. Structural edits (row/column insertion and removal)
//! rewrite parked formula ASTs lazily through an append-only transform
//! log. Cycles are either flagged `#CYCLE!` or, in tolerant mode,
//! evaluated from user-supplied seed values.

pub mod column_search;
pub mod config;
pub mod content;
pub mod engine;
pub mod export;
pub mod functions;
pub mod interpreter;
pub mod stats;

pub use config::{Config, ConfigError};
pub use engine::{
    Engine, EngineError, InverseCommand, NameScope, NamedExpressionDef, PassSummary,
    SheetContent, Transform,
};
pub use export::ExportedValue;

pub use recalc_common::{CellError, CellRef, CellValue, Coord, ErrorKind, RangeRef, SheetId};
