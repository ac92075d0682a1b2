//! AST evaluation against the engine's cached state.
//!
//! Cell-plane errors are data here: evaluation never fails, it produces
//! `CellValue::Error` values that flow through operators and functions by
//! the usual propagation rules.

use std::cell::Cell;
use std::cmp::Ordering;

use recalc_common::{CellError, CellRef, CellValue, ErrorKind, RangeRef, SheetId, format_number};
use recalc_parse::{AstKind, AstNode, BinaryOp, RangeReference, UnaryOp};

use crate::column_search::SearchOutcome;
use crate::config::Config;
use crate::functions::{ArgValue, FunctionDef};

/// Everything the interpreter can ask of its host during evaluation.
pub trait EvaluationContext {
    fn config(&self) -> &Config;
    fn cell_value(&self, cell: CellRef) -> CellValue;
    fn range_values(&self, range: &RangeRef) -> Vec<Vec<CellValue>>;
    /// Open ranges clamped to used bounds; `None` when nothing is there.
    fn clamped_rect(&self, range: &RangeRef) -> Option<(u32, u32, u32, u32)>;
    fn named_value(&self, name: &str, sheet: SheetId) -> Option<CellValue>;
    fn function(&self, name: &str) -> Option<&FunctionDef>;
    fn search_column(
        &self,
        sheet: SheetId,
        col: u32,
        row_lo: u32,
        row_hi: u32,
        needle: &CellValue,
    ) -> SearchOutcome;
}

/// An evaluation result: a scalar, or an array about to broadcast or spill.
#[derive(Debug, Clone, PartialEq)]
pub enum Computed {
    Scalar(CellValue),
    Array(Vec<Vec<CellValue>>),
}

impl Computed {
    /// Implicit intersection: an array read in a scalar slot takes its
    /// top-left element.
    pub fn into_scalar(self) -> CellValue {
        match self {
            Computed::Scalar(v) => v,
            Computed::Array(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(CellValue::Empty),
        }
    }

    pub fn into_array(self) -> Vec<Vec<CellValue>> {
        match self {
            Computed::Scalar(v) => vec![vec![v]],
            Computed::Array(rows) => rows,
        }
    }

    fn error(kind: ErrorKind) -> Self {
        Computed::Scalar(CellValue::Error(kind.into()))
    }
}

const MAX_EVAL_DEPTH: u32 = 128;

pub struct Interpreter<'a> {
    ctx: &'a dyn EvaluationContext,
    host_sheet: SheetId,
    depth: Cell<u32>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a dyn EvaluationContext, host_sheet: SheetId) -> Self {
        Self {
            ctx,
            host_sheet,
            depth: Cell::new(0),
        }
    }

    pub fn evaluate(&self, node: &AstNode) -> Computed {
        if self.depth.get() >= MAX_EVAL_DEPTH {
            return Computed::Scalar(CellValue::Error(
                CellError::new(ErrorKind::Error).with_message("formula nesting too deep"),
            ));
        }
        self.depth.set(self.depth.get() + 1);
        let out = self.evaluate_inner(node);
        self.depth.set(self.depth.get() - 1);
        out
    }

    fn evaluate_inner(&self, node: &AstNode) -> Computed {
        match &node.kind {
            AstKind::Literal(v) => Computed::Scalar(v.clone()),
            AstKind::CellRef(r) => {
                let sheet = r.sheet.unwrap_or(self.host_sheet);
                Computed::Scalar(
                    self.ctx
                        .cell_value(CellRef::at(sheet, r.coord.row, r.coord.col)),
                )
            }
            AstKind::RangeRef(r) => {
                Computed::Array(self.ctx.range_values(&self.resolve_range(r)))
            }
            AstKind::NamedRef(name) => match self.ctx.named_value(name, self.host_sheet) {
                Some(v) => Computed::Scalar(v),
                None => Computed::error(ErrorKind::Name),
            },
            AstKind::Unary { op, expr } => {
                let value = self.evaluate(expr);
                self.apply_unary(*op, value)
            }
            AstKind::Binary { op, left, right } => {
                let lhs = self.evaluate(left);
                let rhs = self.evaluate(right);
                self.apply_binary(*op, lhs, rhs)
            }
            AstKind::Function { name, args } => self.call_function(name, args),
            AstKind::Array(rows) => Computed::Array(
                rows.iter()
                    .map(|row| {
                        row.iter()
                            .map(|item| self.evaluate(item).into_scalar())
                            .collect()
                    })
                    .collect(),
            ),
        }
    }

    fn resolve_range(&self, r: &RangeReference) -> RangeRef {
        RangeRef::new(
            r.sheet.unwrap_or(self.host_sheet),
            recalc_common::Coord::relative(r.start.row, r.start.col),
            recalc_common::Coord::relative(r.end.row, r.end.col),
        )
    }

    /* ─────────────────────── operators ─────────────────────── */

    fn apply_unary(&self, op: UnaryOp, value: Computed) -> Computed {
        self.map_elementwise(value, |v| match op {
            UnaryOp::Plus => v,
            UnaryOp::Minus => match self.to_number(&v) {
                Ok(n) => CellValue::Number(-n),
                Err(e) => CellValue::Error(e),
            },
            UnaryOp::Percent => match self.to_number(&v) {
                Ok(n) => CellValue::Number(n / 100.0),
                Err(e) => CellValue::Error(e),
            },
        })
    }

    fn apply_binary(&self, op: BinaryOp, lhs: Computed, rhs: Computed) -> Computed {
        match (lhs, rhs) {
            (Computed::Scalar(a), Computed::Scalar(b)) => {
                Computed::Scalar(self.binary_scalar(op, a, b))
            }
            (lhs, rhs) => {
                if !self.ctx.config().array_arithmetic {
                    return Computed::error(ErrorKind::Value);
                }
                self.broadcast(op, lhs.into_array(), rhs.into_array())
            }
        }
    }

    /// Elementwise combination with 1x1 / row / column broadcasting.
    fn broadcast(
        &self,
        op: BinaryOp,
        a: Vec<Vec<CellValue>>,
        b: Vec<Vec<CellValue>>,
    ) -> Computed {
        let (ah, aw) = (a.len() as u32, a.first().map_or(0, |r| r.len()) as u32);
        let (bh, bw) = (b.len() as u32, b.first().map_or(0, |r| r.len()) as u32);
        if ah == 0 || aw == 0 || bh == 0 || bw == 0 {
            return Computed::error(ErrorKind::Value);
        }
        let broadcastable = |x: u32, y: u32| x == y || x == 1 || y == 1;
        if !broadcastable(ah, bh) || !broadcastable(aw, bw) {
            return Computed::error(ErrorKind::Value);
        }
        let (h, w) = (ah.max(bh), aw.max(bw));
        let pick = |grid: &Vec<Vec<CellValue>>, gh: u32, gw: u32, r: u32, c: u32| {
            grid[(if gh == 1 { 0 } else { r }) as usize][(if gw == 1 { 0 } else { c }) as usize]
                .clone()
        };
        let rows = (0..h)
            .map(|r| {
                (0..w)
                    .map(|c| {
                        self.binary_scalar(op, pick(&a, ah, aw, r, c), pick(&b, bh, bw, r, c))
                    })
                    .collect()
            })
            .collect();
        Computed::Array(rows)
    }

    fn map_elementwise(&self, value: Computed, f: impl Fn(CellValue) -> CellValue) -> Computed {
        match value {
            Computed::Scalar(v) => Computed::Scalar(f(v)),
            Computed::Array(rows) => {
                if !self.ctx.config().array_arithmetic {
                    return Computed::error(ErrorKind::Value);
                }
                Computed::Array(
                    rows.into_iter()
                        .map(|row| row.into_iter().map(&f).collect())
                        .collect(),
                )
            }
        }
    }

    fn binary_scalar(&self, op: BinaryOp, a: CellValue, b: CellValue) -> CellValue {
        if let CellValue::Error(e) = &a {
            return CellValue::Error(e.clone());
        }
        if let CellValue::Error(e) = &b {
            return CellValue::Error(e.clone());
        }
        match op {
            BinaryOp::Add => self.arithmetic(a, b, |x, y| x + y),
            BinaryOp::Sub => self.arithmetic(a, b, |x, y| x - y),
            BinaryOp::Mul => self.arithmetic(a, b, |x, y| x * y),
            BinaryOp::Div => {
                let (x, y) = match (self.to_number(&a), self.to_number(&b)) {
                    (Ok(x), Ok(y)) => (x, y),
                    (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
                };
                if y == 0.0 {
                    CellValue::Error(ErrorKind::Div.into())
                } else {
                    CellValue::Number(x / y)
                }
            }
            BinaryOp::Pow => {
                let (x, y) = match (self.to_number(&a), self.to_number(&b)) {
                    (Ok(x), Ok(y)) => (x, y),
                    (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
                };
                let n = x.powf(y);
                if n.is_finite() {
                    CellValue::Number(n)
                } else {
                    CellValue::Error(ErrorKind::Num.into())
                }
            }
            BinaryOp::Concat => {
                CellValue::Text(format!("{}{}", self.to_text(&a), self.to_text(&b)))
            }
            BinaryOp::Eq => CellValue::Boolean(self.compare(&a, &b) == Some(Ordering::Equal)),
            BinaryOp::NotEq => CellValue::Boolean(self.compare(&a, &b) != Some(Ordering::Equal)),
            BinaryOp::Less => CellValue::Boolean(self.compare(&a, &b) == Some(Ordering::Less)),
            BinaryOp::LessEq => matches!(
                self.compare(&a, &b),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
            .into(),
            BinaryOp::Greater => {
                CellValue::Boolean(self.compare(&a, &b) == Some(Ordering::Greater))
            }
            BinaryOp::GreaterEq => matches!(
                self.compare(&a, &b),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            )
            .into(),
        }
    }

    fn arithmetic(&self, a: CellValue, b: CellValue, f: impl Fn(f64, f64) -> f64) -> CellValue {
        match (self.to_number(&a), self.to_number(&b)) {
            (Ok(x), Ok(y)) => {
                let n = f(x, y);
                if n.is_finite() {
                    CellValue::Number(n)
                } else {
                    CellValue::Error(ErrorKind::Num.into())
                }
            }
            (Err(e), _) | (_, Err(e)) => CellValue::Error(e),
        }
    }

    pub fn to_number(&self, v: &CellValue) -> Result<f64, CellError> {
        match v {
            CellValue::Number(n) => Ok(*n),
            CellValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => {
                if self.ctx.config().empty_value_is_zero {
                    Ok(0.0)
                } else {
                    Err(ErrorKind::Value.into())
                }
            }
            CellValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| ErrorKind::Value.into()),
            CellValue::Error(e) => Err(e.clone()),
        }
    }

    fn to_text(&self, v: &CellValue) -> String {
        match v {
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            CellValue::Empty => String::new(),
            CellValue::Error(_) => String::new(), // unreachable: errors short-circuit
        }
    }

    /// Spreadsheet comparison: within a type rank, natural order (text
    /// case-insensitive unless configured otherwise); across ranks,
    /// Number < Text < Boolean; `Empty` coerces to the other side's zero
    /// value.
    fn compare(&self, a: &CellValue, b: &CellValue) -> Option<Ordering> {
        use CellValue::*;
        match (a, b) {
            (Empty, Empty) => Some(Ordering::Equal),
            (Empty, other) => self.compare(&zero_of(other), other),
            (other, Empty) => self.compare(other, &zero_of(other)),
            (Number(x), Number(y)) => x.partial_cmp(y),
            (Text(x), Text(y)) => {
                if self.ctx.config().case_sensitive_comparison {
                    Some(x.cmp(y))
                } else {
                    Some(x.to_lowercase().cmp(&y.to_lowercase()))
                }
            }
            (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
            (Number(_), Text(_) | Boolean(_)) => Some(Ordering::Less),
            (Text(_) | Boolean(_), Number(_)) => Some(Ordering::Greater),
            (Text(_), Boolean(_)) => Some(Ordering::Less),
            (Boolean(_), Text(_)) => Some(Ordering::Greater),
            (Error(_), _) | (_, Error(_)) => None,
        }
    }

    /* ─────────────────────── functions ─────────────────────── */

    fn call_function(&self, name: &str, args: &[AstNode]) -> Computed {
        let Some(def) = self.ctx.function(name) else {
            return Computed::error(ErrorKind::Name);
        };
        if args.len() < def.min_args || def.max_args.is_some_and(|max| args.len() > max) {
            return Computed::error(ErrorKind::Na);
        }
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.argument(arg));
        }
        Computed::Scalar(def.call(&evaluated, self.ctx))
    }

    /// Ranges keep their origin so lookup functions can go through the
    /// column search strategy instead of scanning.
    fn argument(&self, node: &AstNode) -> ArgValue {
        match &node.kind {
            AstKind::RangeRef(r) => {
                let range = self.resolve_range(r);
                let origin = self
                    .ctx
                    .clamped_rect(&range)
                    .map(|(r1, c1, _, _)| (range.sheet_id, r1, c1));
                ArgValue::Array {
                    values: self.ctx.range_values(&range),
                    origin,
                }
            }
            _ => match self.evaluate(node) {
                Computed::Scalar(v) => ArgValue::Scalar(v),
                Computed::Array(values) => ArgValue::Array {
                    values,
                    origin: None,
                },
            },
        }
    }
}

fn zero_of(v: &CellValue) -> CellValue {
    match v {
        CellValue::Number(_) => CellValue::Number(0.0),
        CellValue::Text(_) => CellValue::Text(String::new()),
        CellValue::Boolean(_) => CellValue::Boolean(false),
        other => other.clone(),
    }
}
