//! The function registry and the builtin set.
//!
//! The registry is owned by each engine instance and handed to the
//! interpreter through its context; there is no process-wide table.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use recalc_common::{CellValue, ErrorKind, format_number};
use rustc_hash::FxHashMap;

use crate::column_search::SearchOutcome;
use crate::config::Config;
use crate::interpreter::EvaluationContext;

/// One evaluated argument. Ranges keep their top-left origin so lookup
/// functions can use the column search index.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Scalar(CellValue),
    Array {
        values: Vec<Vec<CellValue>>,
        origin: Option<(recalc_common::SheetId, u32, u32)>,
    },
}

type EvalFn = fn(&[ArgValue], &dyn EvaluationContext) -> CellValue;

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub volatile: bool,
    eval: EvalFn,
}

impl FunctionDef {
    pub fn call(&self, args: &[ArgValue], ctx: &dyn EvaluationContext) -> CellValue {
        (self.eval)(args, ctx)
    }
}

#[derive(Debug)]
pub struct FunctionRegistry {
    map: FxHashMap<&'static str, FunctionDef>,
}

impl FunctionRegistry {
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            map: FxHashMap::default(),
        };
        let defs: &[(&'static str, usize, Option<usize>, bool, EvalFn)] = &[
            ("SUM", 0, None, false, fn_sum),
            ("AVERAGE", 1, None, false, fn_average),
            ("COUNT", 0, None, false, fn_count),
            ("MIN", 1, None, false, fn_min),
            ("MAX", 1, None, false, fn_max),
            ("ABS", 1, Some(1), false, fn_abs),
            ("IF", 2, Some(3), false, fn_if),
            ("AND", 1, None, false, fn_and),
            ("OR", 1, None, false, fn_or),
            ("NOT", 1, Some(1), false, fn_not),
            ("CONCATENATE", 1, None, false, fn_concatenate),
            ("MATCH", 2, Some(3), false, fn_match),
            ("NOW", 0, Some(0), true, fn_now),
            ("TODAY", 0, Some(0), true, fn_today),
            ("RAND", 0, Some(0), true, fn_rand),
        ];
        for &(name, min_args, max_args, volatile, eval) in defs {
            reg.map.insert(
                name,
                FunctionDef {
                    name,
                    min_args,
                    max_args,
                    volatile,
                    eval,
                },
            );
        }
        reg
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.map.get(name.to_ascii_uppercase().as_str())
    }

    pub fn is_volatile(&self, name: &str) -> bool {
        self.get(name).map(|d| d.volatile).unwrap_or(false)
    }
}

/* ─────────────────── argument plumbing ─────────────────── */

/// Folds numeric content: direct scalars coerce (text must parse, booleans
/// count), array members contribute only genuine numbers. Errors win.
fn fold_numbers(
    args: &[ArgValue],
    mut f: impl FnMut(f64),
) -> Result<(), CellValue> {
    for arg in args {
        match arg {
            ArgValue::Scalar(v) => match v {
                CellValue::Error(e) => return Err(CellValue::Error(e.clone())),
                CellValue::Number(n) => f(*n),
                CellValue::Boolean(b) => f(if *b { 1.0 } else { 0.0 }),
                CellValue::Empty => {}
                CellValue::Text(s) => match s.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => f(n),
                    _ => return Err(CellValue::Error(ErrorKind::Value.into())),
                },
            },
            ArgValue::Array { values, .. } => {
                for row in values {
                    for v in row {
                        match v {
                            CellValue::Error(e) => return Err(CellValue::Error(e.clone())),
                            CellValue::Number(n) => f(*n),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn scalar(arg: &ArgValue) -> CellValue {
    match arg {
        ArgValue::Scalar(v) => v.clone(),
        ArgValue::Array { values, .. } => values
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(CellValue::Empty),
    }
}

fn truthy(v: &CellValue) -> Result<bool, CellValue> {
    match v {
        CellValue::Boolean(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Empty => Ok(false),
        CellValue::Text(_) => Err(CellValue::Error(ErrorKind::Value.into())),
        CellValue::Error(e) => Err(CellValue::Error(e.clone())),
    }
}

/* ─────────────────── aggregates ─────────────────── */

fn fn_sum(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut total = 0.0;
    match fold_numbers(args, |n| total += n) {
        Ok(()) => CellValue::Number(total),
        Err(e) => e,
    }
}

fn fn_average(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut total = 0.0;
    let mut count = 0u64;
    match fold_numbers(args, |n| {
        total += n;
        count += 1;
    }) {
        Ok(()) if count > 0 => CellValue::Number(total / count as f64),
        Ok(()) => CellValue::Error(ErrorKind::Div.into()),
        Err(e) => e,
    }
}

fn fn_count(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut count = 0u64;
    // COUNT ignores non-numeric content entirely, including errors
    for arg in args {
        match arg {
            ArgValue::Scalar(CellValue::Number(_)) => count += 1,
            ArgValue::Scalar(_) => {}
            ArgValue::Array { values, .. } => {
                count += values
                    .iter()
                    .flatten()
                    .filter(|v| matches!(v, CellValue::Number(_)))
                    .count() as u64;
            }
        }
    }
    CellValue::Number(count as f64)
}

fn fn_min(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut best: Option<f64> = None;
    match fold_numbers(args, |n| {
        best = Some(best.map_or(n, |b| b.min(n)));
    }) {
        Ok(()) => CellValue::Number(best.unwrap_or(0.0)),
        Err(e) => e,
    }
}

fn fn_max(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut best: Option<f64> = None;
    match fold_numbers(args, |n| {
        best = Some(best.map_or(n, |b| b.max(n)));
    }) {
        Ok(()) => CellValue::Number(best.unwrap_or(0.0)),
        Err(e) => e,
    }
}

fn fn_abs(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    match scalar(&args[0]) {
        CellValue::Error(e) => CellValue::Error(e),
        v => match v {
            CellValue::Number(n) => CellValue::Number(n.abs()),
            CellValue::Boolean(b) => CellValue::Number(if b { 1.0 } else { 0.0 }),
            CellValue::Empty => CellValue::Number(0.0),
            CellValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => CellValue::Number(n.abs()),
                _ => CellValue::Error(ErrorKind::Value.into()),
            },
            CellValue::Error(_) => unreachable!(),
        },
    }
}

/* ─────────────────── logic ─────────────────── */

fn fn_if(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    match truthy(&scalar(&args[0])) {
        Ok(true) => scalar(&args[1]),
        Ok(false) => args.get(2).map(scalar).unwrap_or(CellValue::Boolean(false)),
        Err(e) => e,
    }
}

fn fn_and(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    for arg in args {
        match truthy(&scalar(arg)) {
            Ok(false) => return CellValue::Boolean(false),
            Ok(true) => {}
            Err(e) => return e,
        }
    }
    CellValue::Boolean(true)
}

fn fn_or(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    for arg in args {
        match truthy(&scalar(arg)) {
            Ok(true) => return CellValue::Boolean(true),
            Ok(false) => {}
            Err(e) => return e,
        }
    }
    CellValue::Boolean(false)
}

fn fn_not(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    match truthy(&scalar(&args[0])) {
        Ok(b) => CellValue::Boolean(!b),
        Err(e) => e,
    }
}

fn fn_concatenate(args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    let mut out = String::new();
    for arg in args {
        match scalar(arg) {
            CellValue::Error(e) => return CellValue::Error(e),
            CellValue::Number(n) => out.push_str(&format_number(n)),
            CellValue::Text(s) => out.push_str(&s),
            CellValue::Boolean(b) => out.push_str(if b { "TRUE" } else { "FALSE" }),
            CellValue::Empty => {}
        }
    }
    CellValue::Text(out)
}

/* ─────────────────── lookup ─────────────────── */

/// Exact MATCH over a one-dimensional range; goes through the column
/// search strategy when the range is a single indexed column.
fn fn_match(args: &[ArgValue], ctx: &dyn EvaluationContext) -> CellValue {
    let needle = scalar(&args[0]);
    if let CellValue::Error(e) = &needle {
        return CellValue::Error(e.clone());
    }
    if let Some(mode) = args.get(2) {
        match scalar(mode) {
            CellValue::Number(n) if n == 0.0 => {}
            CellValue::Empty => {}
            _ => return CellValue::Error(ErrorKind::Na.into()),
        }
    }
    let ArgValue::Array { values, origin } = &args[1] else {
        return CellValue::Error(ErrorKind::Na.into());
    };
    let height = values.len();
    let width = values.first().map_or(0, |r| r.len());

    if width == 1 {
        if let Some(&(sheet, row_lo, col)) = origin.as_ref() {
            let row_hi = row_lo + height.saturating_sub(1) as u32;
            match ctx.search_column(sheet, col, row_lo, row_hi, &needle) {
                SearchOutcome::Found(row) => {
                    return CellValue::Number((row - row_lo + 1) as f64);
                }
                SearchOutcome::NotFound => return CellValue::Error(ErrorKind::Na.into()),
                SearchOutcome::Unindexed => {}
            }
        }
        for (i, row) in values.iter().enumerate() {
            if row[0] == needle {
                return CellValue::Number((i + 1) as f64);
            }
        }
        return CellValue::Error(ErrorKind::Na.into());
    }
    if height == 1 {
        for (i, v) in values[0].iter().enumerate() {
            if *v == needle {
                return CellValue::Number((i + 1) as f64);
            }
        }
        return CellValue::Error(ErrorKind::Na.into());
    }
    CellValue::Error(ErrorKind::Na.into())
}

/* ─────────────────── volatile ─────────────────── */

/// Serial day number of a date on the configured scale.
pub fn date_serial(config: &Config, date: NaiveDate) -> f64 {
    let mut days = (date - config.null_date).num_days() as f64;
    if config.leap_year_1900 {
        // the phantom 1900-02-29
        if date >= NaiveDate::from_ymd_opt(1900, 3, 1).unwrap() {
            days += 1.0;
        }
    }
    days
}

fn datetime_serial(config: &Config, dt: NaiveDateTime) -> f64 {
    let frac = dt.time().num_seconds_from_midnight() as f64 / 86_400.0;
    date_serial(config, dt.date()) + frac
}

fn fn_now(_args: &[ArgValue], ctx: &dyn EvaluationContext) -> CellValue {
    CellValue::Number(datetime_serial(ctx.config(), chrono::Local::now().naive_local()))
}

fn fn_today(_args: &[ArgValue], ctx: &dyn EvaluationContext) -> CellValue {
    CellValue::Number(date_serial(
        ctx.config(),
        chrono::Local::now().naive_local().date(),
    ))
}

fn fn_rand(_args: &[ArgValue], _ctx: &dyn EvaluationContext) -> CellValue {
    CellValue::Number(rand::random::<f64>())
}
