//! The evaluation engine: dependency graph, scheduler, lazy AST
//! transforms, structural operations and the public facade tying them
//! together.

pub mod address_mapping;
pub mod builder;
pub mod eval;
pub mod graph;
pub mod named;
pub mod ops;
pub mod range_mapping;
pub mod scheduler;
pub mod sheet_registry;
pub mod transform;
pub mod vertex;

#[cfg(test)]
mod tests;

use std::fmt;

use recalc_common::{CellRef, CellValue, SheetId};
use recalc_parse::{ParseContext, Parser, UnparseContext, Unparser};
use rustc_hash::FxHashMap;

use crate::column_search::ColumnSearch;
use crate::config::{Config, ConfigError};
use crate::content::{CellContent, CellContentParser};
use crate::functions::FunctionRegistry;
use crate::stats::{StatPhase, Statistics};

pub use eval::PassSummary;
pub use graph::DependencyGraph;
pub use named::NameScope;
pub use ops::InverseCommand;
pub use scheduler::{Component, Schedule, Scheduler};
pub use transform::{AstId, Transform, TransformService};
pub use vertex::{Vertex, VertexArena, VertexId, VertexKind};

/// Operation-plane errors: these abort the current operation and leave the
/// engine unchanged, in contrast to cell-plane `CellValue::Error`s which
/// are ordinary data.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    SheetSizeLimit {
        sheet: String,
        rows: u32,
        columns: u32,
    },
    InvalidSheet(String),
    DuplicateSheet(String),
    NamedExpressionNameInvalid(String),
    NamedExpressionDuplicate(String),
    InvalidArgument(String),
    Config(ConfigError),
    /// A graph-integrity violation detected in release mode.
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::SheetSizeLimit {
                sheet,
                rows,
                columns,
            } => write!(
                f,
                "sheet '{sheet}' exceeds the configured size limit ({rows} rows, {columns} columns)"
            ),
            EngineError::InvalidSheet(name) => write!(f, "no sheet named '{name}'"),
            EngineError::DuplicateSheet(name) => write!(f, "sheet '{name}' already exists"),
            EngineError::NamedExpressionNameInvalid(name) => {
                write!(f, "'{name}' is not a valid expression name")
            }
            EngineError::NamedExpressionDuplicate(name) => {
                write!(f, "expression name '{name}' already defined in this scope")
            }
            EngineError::InvalidArgument(msg) => write!(f, "{msg}"),
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::Internal(msg) => write!(f, "internal engine error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// A named expression supplied at build time.
#[derive(Debug, Clone)]
pub struct NamedExpressionDef {
    pub name: String,
    pub expression: String,
    /// `None` = workbook scope.
    pub scope_sheet: Option<String>,
}

/// Raw sheet content: rows of raw cell strings.
pub type SheetContent = Vec<Vec<String>>;

/// The engine bundle: every service an operation needs travels through
/// this struct, explicitly. There are no process-wide singletons.
#[derive(Debug)]
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) stats: Statistics,
    pub(crate) graph: DependencyGraph,
    pub(crate) transforms: TransformService,
    pub(crate) registry: FunctionRegistry,
    pub(crate) column_search: ColumnSearch,
    pub(crate) content_parser: CellContentParser,
    /// Unconsumed initial computed values, by address. Entries are taken
    /// the first time the seeded vertex would evaluate.
    pub(crate) seeds: FxHashMap<CellRef, CellValue>,
    pub(crate) undo_log: Vec<InverseCommand>,
    pub(crate) evaluation_pending: bool,
}

/* ─────────────────── parser plumbing ─────────────────── */

pub(crate) struct EngineParseContext<'a> {
    pub sheets: &'a sheet_registry::SheetRegistry,
    pub registry: &'a FunctionRegistry,
}

impl<'a> ParseContext for EngineParseContext<'a> {
    fn resolve_sheet(&self, name: &str) -> Option<SheetId> {
        self.sheets.id_for(name)
    }

    fn is_volatile_function(&self, name: &str) -> bool {
        self.registry.is_volatile(name)
    }
}

pub(crate) struct EngineUnparseContext<'a> {
    pub sheets: &'a sheet_registry::SheetRegistry,
}

impl<'a> UnparseContext for EngineUnparseContext<'a> {
    fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.sheets.name_of(id)
    }
}

impl Engine {
    /* ─────────────────── factories ─────────────────── */

    /// An engine with no sheets.
    pub fn build_empty(config: Config) -> Result<Engine, EngineError> {
        config.validate()?;
        let mut engine = Engine {
            stats: Statistics::new(config.use_stats),
            graph: DependencyGraph::new(config.max_rows, config.max_columns),
            transforms: TransformService::new(),
            registry: FunctionRegistry::with_builtins(),
            column_search: ColumnSearch::new(config.use_column_index),
            content_parser: CellContentParser::new(&config),
            seeds: FxHashMap::default(),
            undo_log: Vec::new(),
            evaluation_pending: false,
            config,
        };
        engine.stats.bump(StatPhase::BuildEngine);
        Ok(engine)
    }

    /// Bulk build from named sheets.
    pub fn build_from_sheets(
        sheets: Vec<(String, SheetContent)>,
        config: Config,
    ) -> Result<Engine, EngineError> {
        Self::build_from_sheets_with_named_expressions(sheets, config, &[])
    }

    pub fn build_from_sheets_with_named_expressions(
        sheets: Vec<(String, SheetContent)>,
        config: Config,
        named_expressions: &[NamedExpressionDef],
    ) -> Result<Engine, EngineError> {
        let mut engine = Self::build_empty(config)?;
        engine.stats.start(StatPhase::BuildEngine);
        builder::build_into(&mut engine, &sheets)?;
        for def in named_expressions {
            engine.add_named_expression(
                &def.name,
                &def.expression,
                def.scope_sheet.as_deref(),
            )?;
        }
        engine.undo_log.clear();
        engine.stats.stop(StatPhase::BuildEngine);
        Ok(engine)
    }

    /// Bulk build from a single anonymous sheet, named
    /// `new_sheet_prefix + "1"`. Initial computed values keyed by the one
    /// supplied sheet name are remapped onto the generated name.
    pub fn build_from_sheet(
        cells: SheetContent,
        mut config: Config,
    ) -> Result<Engine, EngineError> {
        let generated = format!("{}1", config.new_sheet_prefix);
        if config.initial_computed_values.len() == 1 {
            let values: Vec<_> = config.initial_computed_values.drain().collect();
            for (_, matrix) in values {
                config.initial_computed_values.insert(generated.clone(), matrix);
            }
        }
        Self::build_from_sheets(vec![(generated, cells)], config)
    }

    /// Re-serializes the whole workbook and rebuilds it under a new
    /// configuration, carrying named expressions along.
    pub fn rebuild_with_config(mut self, config: Config) -> Result<Engine, EngineError> {
        config.validate()?;
        let sheet_names: Vec<(SheetId, String)> = self
            .graph
            .sheets
            .iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect();
        let mut sheets = Vec::with_capacity(sheet_names.len());
        for (_, name) in &sheet_names {
            let content = self.serialized_sheet(name)?;
            sheets.push((name.clone(), content));
        }
        let named: Vec<NamedExpressionDef> = {
            let mut defs = Vec::new();
            let entries: Vec<_> = self
                .graph
                .named
                .iter()
                .map(|e| (e.name.clone(), e.scope, e.vertex))
                .collect();
            for (name, scope, vertex) in entries {
                let Some(ast_id) = self.graph.vertex(vertex).and_then(|v| v.ast_id()) else {
                    continue;
                };
                let Some(ast) = self.transforms.materialized_clone(ast_id) else {
                    continue;
                };
                let expression = {
                    let ctx = EngineUnparseContext {
                        sheets: &self.graph.sheets,
                    };
                    format!("={}", Unparser::new(&ctx).unparse(&ast))
                };
                let scope_sheet = match scope {
                    NameScope::Workbook => None,
                    NameScope::Sheet(id) => {
                        self.graph.sheets.name_of(id).map(|n| n.to_string())
                    }
                };
                defs.push(NamedExpressionDef {
                    name,
                    expression,
                    scope_sheet,
                });
            }
            defs
        };
        let mut rebuilt =
            Self::build_from_sheets_with_named_expressions(sheets, config, &named)?;
        rebuilt.stats = self.stats;
        Ok(rebuilt)
    }

    /* ─────────────────── reads ─────────────────── */

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.graph.sheets.iter().map(|(_, name)| name).collect()
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.graph.sheets.id_for(name)
    }

    pub(crate) fn resolve_sheet(&self, name: &str) -> Result<SheetId, EngineError> {
        self.graph
            .sheets
            .id_for(name)
            .ok_or_else(|| EngineError::InvalidSheet(name.to_string()))
    }

    /// The computed value of a cell. Reading is the evaluation trigger: a
    /// pending recompute pass runs first.
    pub fn get_cell_value(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
    ) -> Result<CellValue, EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        self.recompute_if_needed();
        Ok(self.graph.cell_value(CellRef::at(sheet_id, row, col)))
    }

    /// A rectangle of computed values.
    pub fn get_range_values(
        &mut self,
        sheet: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<Vec<CellValue>>, EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        self.recompute_if_needed();
        Ok((start.0..=end.0)
            .map(|row| {
                (start.1..=end.1)
                    .map(|col| self.graph.cell_value(CellRef::at(sheet_id, row, col)))
                    .collect()
            })
            .collect())
    }

    /// The canonical formula string of a cell, `=`-prefixed, or `None` for
    /// non-formula cells.
    pub fn get_formula(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
    ) -> Result<Option<String>, EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        let cell = CellRef::at(sheet_id, row, col);
        let Some(id) = self.graph.vertex_at(cell) else {
            return Ok(None);
        };
        let anchored_here = self
            .graph
            .vertex(id)
            .and_then(|v| v.cell())
            .map(|c| c == cell)
            .unwrap_or(false);
        if !anchored_here {
            return Ok(None);
        }
        let Some(ast_id) = self.graph.vertex(id).and_then(|v| v.ast_id()) else {
            return Ok(None);
        };
        let Some(ast) = self.transforms.materialized_clone(ast_id) else {
            return Ok(None);
        };
        let ctx = EngineUnparseContext {
            sheets: &self.graph.sheets,
        };
        Ok(Some(format!("={}", Unparser::new(&ctx).unparse(&ast))))
    }

    /// Raw content of the whole sheet, formulas unparsed canonically.
    pub fn serialized_sheet(&mut self, sheet: &str) -> Result<SheetContent, EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        self.recompute_if_needed();
        let Some((max_row, max_col)) = self
            .graph
            .addresses
            .sheet(sheet_id)
            .and_then(|m| m.used_bounds())
        else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(max_row as usize + 1);
        for row in 0..=max_row {
            let mut line = Vec::with_capacity(max_col as usize + 1);
            for col in 0..=max_col {
                line.push(self.raw_cell_content(CellRef::at(sheet_id, row, col)));
            }
            out.push(line);
        }
        Ok(out)
    }

    /// Reconstructs the raw string that would classify back to this cell's
    /// content.
    pub(crate) fn raw_cell_content(&mut self, cell: CellRef) -> String {
        let Some(id) = self.graph.vertex_at(cell) else {
            return String::new();
        };
        let Some(vertex) = self.graph.vertex(id) else {
            return String::new();
        };
        let anchored_here = vertex.cell() == Some(cell);
        match &vertex.kind {
            VertexKind::Empty { .. } => String::new(),
            VertexKind::Value { value, .. } => serialize_literal(&self.content_parser, value),
            VertexKind::Formula { .. } | VertexKind::Array { .. } => {
                if !anchored_here {
                    // array interior
                    return String::new();
                }
                let Some(ast_id) = vertex.ast_id() else {
                    return String::new();
                };
                let Some(ast) = self.transforms.materialized_clone(ast_id) else {
                    return String::new();
                };
                let ctx = EngineUnparseContext {
                    sheets: &self.graph.sheets,
                };
                format!("={}", Unparser::new(&ctx).unparse(&ast))
            }
            VertexKind::Range { .. } | VertexKind::Named { .. } => String::new(),
        }
    }

    /// Parses formula text (body, no `=`) in this engine's context.
    pub(crate) fn parse_formula(
        &mut self,
        body: &str,
    ) -> Result<recalc_parse::AstNode, recalc_parse::ParseError> {
        self.stats.start(StatPhase::Parser);
        let out = {
            let ctx = EngineParseContext {
                sheets: &self.graph.sheets,
                registry: &self.registry,
            };
            Parser::parse(body, &ctx)
        };
        self.stats.stop(StatPhase::Parser);
        out
    }
}

/// Renders a literal so `classify` reproduces it; text that would
/// re-classify as something else gets the verbatim `'` prefix.
fn serialize_literal(parser: &CellContentParser, value: &CellValue) -> String {
    match value {
        CellValue::Number(n) => recalc_common::format_number(*n),
        CellValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        CellValue::Empty => String::new(),
        CellValue::Error(e) => e.kind.to_string(),
        CellValue::Text(s) => match parser.classify(s) {
            CellContent::Text(t) if &t == s => s.clone(),
            _ => format!("'{s}"),
        },
    }
}
