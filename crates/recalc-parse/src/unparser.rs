//! Canonical rendering of a formula AST back to text.
//!
//! The output is the *canonical form*: uppercase function names, no
//! whitespace, parentheses only where precedence demands them, canonical
//! number formatting. Parsing the output reproduces the same AST.

use recalc_common::{format_number, CellValue, Coord, SheetId, UNBOUNDED};

use crate::parser::{AstKind, AstNode, RangeReference, UnaryOp};

/// Sheet-id to name lookup, supplied by the engine.
pub trait UnparseContext {
    fn sheet_name(&self, id: SheetId) -> Option<&str>;
}

pub struct Unparser<'a> {
    ctx: &'a dyn UnparseContext,
}

/// Precedence of unary operators; above every binary operator so that
/// `-A1*B1` renders without parentheses but `-(A1+B1)` keeps them.
const UNARY_PRECEDENCE: u8 = 6;

impl<'a> Unparser<'a> {
    pub fn new(ctx: &'a dyn UnparseContext) -> Self {
        Self { ctx }
    }

    /// Renders the expression (without a leading `=`).
    pub fn unparse(&self, node: &AstNode) -> String {
        let mut out = String::new();
        self.write(node, 0, &mut out);
        out
    }

    fn write(&self, node: &AstNode, parent_prec: u8, out: &mut String) {
        match &node.kind {
            AstKind::Literal(v) => write_literal(v, out),
            AstKind::CellRef(r) => {
                self.write_sheet_prefix(r.sheet, out);
                out.push_str(&r.coord.to_string());
            }
            AstKind::RangeRef(r) => {
                self.write_sheet_prefix(r.sheet, out);
                write_range(r, out);
            }
            AstKind::NamedRef(name) => out.push_str(name),
            AstKind::Unary { op, expr } => {
                let parens = precedence_of(expr) < UNARY_PRECEDENCE;
                match op {
                    UnaryOp::Plus => out.push('+'),
                    UnaryOp::Minus => out.push('-'),
                    UnaryOp::Percent => {}
                }
                if parens {
                    out.push('(');
                }
                self.write(expr, 0, out);
                if parens {
                    out.push(')');
                }
                if *op == UnaryOp::Percent {
                    out.push('%');
                }
            }
            AstKind::Binary { op, left, right } => {
                let prec = op.precedence();
                let parens = prec < parent_prec;
                if parens {
                    out.push('(');
                }
                self.write_child(left, prec, out);
                out.push_str(op.symbol());
                // Right operand of a left-associative operator needs parens
                // at equal precedence: A1-(B1+C1).
                self.write_child(right, prec + 1, out);
                if parens {
                    out.push(')');
                }
            }
            AstKind::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write(arg, 0, out);
                }
                out.push(')');
            }
            AstKind::Array(rows) => {
                out.push('{');
                for (ri, row) in rows.iter().enumerate() {
                    if ri > 0 {
                        out.push(';');
                    }
                    for (ci, item) in row.iter().enumerate() {
                        if ci > 0 {
                            out.push(',');
                        }
                        self.write(item, 0, out);
                    }
                }
                out.push('}');
            }
        }
    }

    fn write_child(&self, child: &AstNode, required_prec: u8, out: &mut String) {
        let parens = precedence_of(child) < required_prec;
        if parens {
            out.push('(');
        }
        self.write(child, 0, out);
        if parens {
            out.push(')');
        }
    }

    fn write_sheet_prefix(&self, sheet: Option<SheetId>, out: &mut String) {
        let Some(id) = sheet else { return };
        let name = match self.ctx.sheet_name(id) {
            Some(name) => name,
            None => return,
        };
        if needs_quoting(name) {
            out.push('\'');
            for ch in name.chars() {
                if ch == '\'' {
                    out.push('\'');
                }
                out.push(ch);
            }
            out.push('\'');
        } else {
            out.push_str(name);
        }
        out.push('!');
    }
}

/// Effective precedence of a node when it appears as an operand.
fn precedence_of(node: &AstNode) -> u8 {
    match &node.kind {
        AstKind::Binary { op, .. } => op.precedence(),
        AstKind::Unary { .. } => UNARY_PRECEDENCE,
        _ => u8::MAX,
    }
}

fn write_literal(v: &CellValue, out: &mut String) {
    match v {
        CellValue::Number(n) => out.push_str(&format_number(*n)),
        CellValue::Text(s) => {
            out.push('"');
            for ch in s.chars() {
                if ch == '"' {
                    out.push('"');
                }
                out.push(ch);
            }
            out.push('"');
        }
        CellValue::Boolean(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
        CellValue::Empty => {}
        CellValue::Error(e) => out.push_str(&e.kind.to_string()),
    }
}

fn write_range(r: &RangeReference, out: &mut String) {
    if r.end.row == UNBOUNDED {
        // whole column(s): A:A
        push_col(r.start.col, r.start.col_abs(), out);
        out.push(':');
        push_col(r.end.col, r.end.col_abs(), out);
    } else if r.end.col == UNBOUNDED {
        // whole row(s): 1:3
        push_row(r.start.row, r.start.row_abs(), out);
        out.push(':');
        push_row(r.end.row, r.end.row_abs(), out);
    } else {
        out.push_str(&r.start.to_string());
        out.push(':');
        out.push_str(&r.end.to_string());
    }
}

fn push_col(col: u32, abs: bool, out: &mut String) {
    if abs {
        out.push('$');
    }
    out.push_str(&Coord::col_to_letters(col));
}

fn push_row(row: u32, abs: bool, out: &mut String) {
    if abs {
        out.push('$');
    }
    out.push_str(&(row + 1).to_string());
}

fn needs_quoting(name: &str) -> bool {
    name.is_empty()
        || name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseContext, Parser};
    use proptest::prelude::*;

    struct Ctx;

    impl ParseContext for Ctx {
        fn resolve_sheet(&self, name: &str) -> Option<SheetId> {
            match name {
                "Sheet1" => Some(0),
                "Data Sheet" => Some(1),
                _ => None,
            }
        }

        fn is_volatile_function(&self, name: &str) -> bool {
            matches!(name, "NOW" | "RAND" | "TODAY")
        }
    }

    impl UnparseContext for Ctx {
        fn sheet_name(&self, id: SheetId) -> Option<&str> {
            match id {
                0 => Some("Sheet1"),
                1 => Some("Data Sheet"),
                _ => None,
            }
        }
    }

    fn round_trip(s: &str) -> String {
        let ast = Parser::parse(s, &Ctx).unwrap();
        Unparser::new(&Ctx).unparse(&ast)
    }

    #[test]
    fn canonical_forms_are_stable() {
        for s in [
            "A1+B1",
            "A1-(B1+C1)",
            "(A1+B1)*2",
            "-A1^2",
            "-(A1+1)",
            "50%",
            "SUM(A1:B2,C3)",
            "SUM(A:A)",
            "SUM(2:3)",
            "IF(A1>2,\"yes\",\"no\")",
            "'Data Sheet'!A2&\"x\"",
            "Sheet1!$B$2:C4",
            "{1,2;3,4}",
            "tax_rate*A1",
            "#REF!+1",
        ] {
            assert_eq!(round_trip(s), s, "canonical form of {s}");
        }
    }

    #[test]
    fn normalization_applied() {
        assert_eq!(round_trip("sum(a1)"), "SUM(A1)");
        assert_eq!(round_trip("A1 +  B1"), "A1+B1");
        assert_eq!(round_trip("B2:A1"), "A1:B2");
        assert_eq!(round_trip("1.50"), "1.5");
    }

    proptest! {
        /// Canonical text is a fixed point of parse -> unparse.
        #[test]
        fn unparse_is_idempotent(
            row in 0u32..100,
            col in 0u32..26,
            n in -1000i32..1000,
        ) {
            let src = format!(
                "SUM({}{}:{}{})+{}",
                Coord::col_to_letters(col),
                row + 1,
                Coord::col_to_letters(col),
                row + 2,
                n,
            );
            let once = round_trip(&src);
            prop_assert_eq!(round_trip(&once), once);
        }
    }
}
