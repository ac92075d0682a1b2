//! Formula AST and the precedence-climbing parser that produces it.
//!
//! References are resolved and normalized at parse time: sheet names become
//! [`SheetId`]s, coordinates become absolute zero-based indices (anchor
//! flags are kept for display only). A reference to a sheet the context
//! does not know collapses to a `#REF!` literal, matching what the engine
//! would evaluate it to anyway.

use std::fmt;

use recalc_common::{CellValue, Coord, ErrorKind, SheetId, UNBOUNDED};

use crate::tokenizer::{Spanned, Token, Tokenizer};

/// Sheet-name resolution and volatility classification, supplied by the
/// engine.
pub trait ParseContext {
    fn resolve_sheet(&self, name: &str) -> Option<SheetId>;
    fn is_volatile_function(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn at<S: Into<String>>(offset: usize, message: S) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Postfix `%`.
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Less
            | BinaryOp::LessEq
            | BinaryOp::Greater
            | BinaryOp::GreaterEq => 1,
            BinaryOp::Concat => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div => 4,
            BinaryOp::Pow => 5,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
        }
    }
}

/// A single-cell reference with absolute zero-based coordinates.
///
/// `sheet == None` means the sheet the formula lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellReference {
    pub sheet: Option<SheetId>,
    pub coord: Coord,
}

/// A rectangular reference; open ranges carry [`UNBOUNDED`] in the free
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeReference {
    pub sheet: Option<SheetId>,
    pub start: Coord,
    pub end: Coord,
}

impl RangeReference {
    pub fn is_whole_column(&self) -> bool {
        self.end.row == UNBOUNDED
    }

    pub fn is_whole_row(&self) -> bool {
        self.end.col == UNBOUNDED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    Literal(CellValue),
    CellRef(CellReference),
    RangeRef(RangeReference),
    NamedRef(String),
    Unary {
        op: UnaryOp,
        expr: Box<AstNode>,
    },
    Binary {
        op: BinaryOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    Function {
        name: String,
        args: Vec<AstNode>,
    },
    Array(Vec<Vec<AstNode>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub kind: AstKind,
    /// True when the expression contains a call to a volatile function.
    pub contains_volatile: bool,
}

impl AstNode {
    pub fn new(kind: AstKind, contains_volatile: bool) -> Self {
        Self {
            kind,
            contains_volatile,
        }
    }

    pub fn literal(value: CellValue) -> Self {
        Self::new(AstKind::Literal(value), false)
    }

    /// The `#REF!` node dangling references rewrite to.
    pub fn ref_error() -> Self {
        Self::literal(CellValue::Error(ErrorKind::Ref.into()))
    }
}

/* ───────────────────────────── parser ───────────────────────────── */

pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    ctx: &'a dyn ParseContext,
}

/// One side of a `:` pair: a cell, a bare column, or a bare row.
enum RefPart {
    Cell { coord: Coord },
    Column { col: u32, abs: bool },
    Row { row: u32, abs: bool },
}

impl<'a> Parser<'a> {
    /// Parses formula text (without the leading `=`).
    pub fn parse(text: &str, ctx: &'a dyn ParseContext) -> Result<AstNode, ParseError> {
        let tokens = Tokenizer::new(text).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            ctx,
        };
        let node = parser.expression(0)?;
        if let Some(t) = parser.tokens.get(parser.pos) {
            return Err(ParseError::at(t.offset, "unexpected trailing input"));
        }
        Ok(node)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|t| t.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(usize::MAX)
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), ParseError> {
        let offset = self.offset();
        match self.bump() {
            Some(ref t) if t == want => Ok(()),
            _ => Err(ParseError::at(offset, format!("expected {what}"))),
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<AstNode, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binary() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(prec + 1)?;
            let volatile = lhs.contains_volatile || rhs.contains_volatile;
            lhs = AstNode::new(
                AstKind::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                volatile,
            );
        }
        Ok(lhs)
    }

    fn peek_binary(&self) -> Option<BinaryOp> {
        Some(match self.peek()? {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Caret => BinaryOp::Pow,
            Token::Ampersand => BinaryOp::Concat,
            Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Less => BinaryOp::Less,
            Token::LessEq => BinaryOp::LessEq,
            Token::Greater => BinaryOp::Greater,
            Token::GreaterEq => BinaryOp::GreaterEq,
            _ => return None,
        })
    }

    fn unary(&mut self) -> Result<AstNode, ParseError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                let expr = self.unary()?;
                let volatile = expr.contains_volatile;
                Ok(AstNode::new(
                    AstKind::Unary {
                        op: UnaryOp::Plus,
                        expr: Box::new(expr),
                    },
                    volatile,
                ))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let expr = self.unary()?;
                let volatile = expr.contains_volatile;
                Ok(AstNode::new(
                    AstKind::Unary {
                        op: UnaryOp::Minus,
                        expr: Box::new(expr),
                    },
                    volatile,
                ))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<AstNode, ParseError> {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::Percent) {
            self.pos += 1;
            let volatile = expr.contains_volatile;
            expr = AstNode::new(
                AstKind::Unary {
                    op: UnaryOp::Percent,
                    expr: Box::new(expr),
                },
                volatile,
            );
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<AstNode, ParseError> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Number(n)) => {
                // `1:3` is a whole-row range, not arithmetic on numbers.
                if self.peek() == Some(&Token::Colon) {
                    if let Some(start_row) = integral_row(n) {
                        return self.finish_row_range(None, start_row, false, offset);
                    }
                }
                Ok(AstNode::literal(CellValue::Number(n)))
            }
            Some(Token::Str(s)) => Ok(AstNode::literal(CellValue::Text(s))),
            Some(Token::ErrorLit(kind)) => Ok(AstNode::literal(CellValue::Error(kind.into()))),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBrace) => self.array_literal(offset),
            Some(Token::QuotedIdent(name)) => {
                self.expect(&Token::Bang, "'!' after sheet name")?;
                let sheet = self.ctx.resolve_sheet(&name);
                self.sheet_qualified(sheet, offset)
            }
            Some(Token::Ident(word)) => self.ident(word, offset),
            _ => Err(ParseError::at(offset, "expected an expression")),
        }
    }

    fn array_literal(&mut self, offset: usize) -> Result<AstNode, ParseError> {
        let mut rows: Vec<Vec<AstNode>> = vec![Vec::new()];
        let mut volatile = false;
        loop {
            let item = self.expression(0)?;
            volatile |= item.contains_volatile;
            rows.last_mut().unwrap().push(item);
            match self.bump() {
                Some(Token::Comma) => {}
                Some(Token::Semicolon) => rows.push(Vec::new()),
                Some(Token::RBrace) => break,
                _ => return Err(ParseError::at(offset, "expected ',', ';' or '}'")),
            }
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(ParseError::at(offset, "ragged array literal"));
        }
        Ok(AstNode::new(AstKind::Array(rows), volatile))
    }

    /// Bare identifier: boolean, function call, sheet prefix, cell/range
    /// reference, or named expression.
    fn ident(&mut self, word: String, offset: usize) -> Result<AstNode, ParseError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let sheet = self.ctx.resolve_sheet(&word);
            return self.sheet_qualified(sheet, offset);
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            return self.function_call(word.to_ascii_uppercase());
        }
        if word.eq_ignore_ascii_case("TRUE") {
            return Ok(AstNode::literal(CellValue::Boolean(true)));
        }
        if word.eq_ignore_ascii_case("FALSE") {
            return Ok(AstNode::literal(CellValue::Boolean(false)));
        }
        self.reference_or_named(None, word, offset, true)
    }

    fn function_call(&mut self, name: String) -> Result<AstNode, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expression(0)?);
                match self.bump() {
                    Some(Token::Comma) => {}
                    Some(Token::RParen) => break,
                    _ => {
                        return Err(ParseError::at(
                            self.offset(),
                            format!("expected ',' or ')' in {name}(...)"),
                        ))
                    }
                }
            }
        }
        let volatile = self.ctx.is_volatile_function(&name)
            || args.iter().any(|a| a.contains_volatile);
        Ok(AstNode::new(AstKind::Function { name, args }, volatile))
    }

    /// The part after `Sheet!`. `sheet == None` means the name did not
    /// resolve; the reference collapses to `#REF!` but is still consumed.
    fn sheet_qualified(
        &mut self,
        sheet: Option<SheetId>,
        offset: usize,
    ) -> Result<AstNode, ParseError> {
        let node = match self.bump() {
            Some(Token::Ident(word)) => {
                self.reference_or_named(Some(sheet), word, offset, false)?
            }
            Some(Token::Number(n)) => {
                let row = integral_row(n)
                    .ok_or_else(|| ParseError::at(offset, "invalid row reference"))?;
                if self.peek() == Some(&Token::Colon) {
                    self.finish_row_range(Some(sheet), row, false, offset)?
                } else {
                    return Err(ParseError::at(offset, "expected a reference after '!'"));
                }
            }
            _ => return Err(ParseError::at(offset, "expected a reference after '!'")),
        };
        Ok(node)
    }

    /// `sheet`: `None` = no sheet prefix; `Some(None)` = prefix that did
    /// not resolve; `Some(Some(id))` = resolved prefix.
    fn reference_or_named(
        &mut self,
        sheet: Option<Option<SheetId>>,
        word: String,
        offset: usize,
        allow_named: bool,
    ) -> Result<AstNode, ParseError> {
        let part = parse_ref_part(&word);
        match part {
            Some(RefPart::Cell { coord }) => {
                if self.peek() == Some(&Token::Colon) {
                    self.pos += 1;
                    let end = self.range_end(offset)?;
                    self.build_range(sheet, RefPart::Cell { coord }, end, offset)
                } else {
                    Ok(resolve_cell(sheet, coord))
                }
            }
            Some(RefPart::Column { col, abs }) => {
                if self.peek() == Some(&Token::Colon) {
                    self.pos += 1;
                    let end = self.range_end(offset)?;
                    self.build_range(sheet, RefPart::Column { col, abs }, end, offset)
                } else if allow_named {
                    Ok(AstNode::new(AstKind::NamedRef(word), false))
                } else {
                    Err(ParseError::at(offset, "expected a reference"))
                }
            }
            Some(RefPart::Row { .. }) | None => {
                if allow_named && is_valid_name(&word) {
                    Ok(AstNode::new(AstKind::NamedRef(word), false))
                } else {
                    Err(ParseError::at(offset, format!("cannot parse '{word}'")))
                }
            }
        }
    }

    fn range_end(&mut self, offset: usize) -> Result<RefPart, ParseError> {
        match self.bump() {
            Some(Token::Ident(word)) => parse_ref_part(&word)
                .ok_or_else(|| ParseError::at(offset, format!("invalid range end '{word}'"))),
            Some(Token::Number(n)) => integral_row(n)
                .map(|row| RefPart::Row { row, abs: false })
                .ok_or_else(|| ParseError::at(offset, "invalid range end")),
            _ => Err(ParseError::at(offset, "expected a range end after ':'")),
        }
    }

    fn finish_row_range(
        &mut self,
        sheet: Option<Option<SheetId>>,
        start_row: u32,
        start_abs: bool,
        offset: usize,
    ) -> Result<AstNode, ParseError> {
        self.expect(&Token::Colon, "':'")?;
        let end = self.range_end(offset)?;
        self.build_range(
            sheet,
            RefPart::Row {
                row: start_row,
                abs: start_abs,
            },
            end,
            offset,
        )
    }

    fn build_range(
        &mut self,
        sheet: Option<Option<SheetId>>,
        start: RefPart,
        end: RefPart,
        offset: usize,
    ) -> Result<AstNode, ParseError> {
        let (start, end) = match (start, end) {
            (RefPart::Cell { coord: a }, RefPart::Cell { coord: b }) => {
                // Normalize so start is the top-left corner.
                let (r1, r2) = minmax(a.row, b.row);
                let (c1, c2) = minmax(a.col, b.col);
                (
                    Coord::new(r1, c1, a.row_abs(), a.col_abs()),
                    Coord::new(r2, c2, b.row_abs(), b.col_abs()),
                )
            }
            (RefPart::Column { col: a, abs: aa }, RefPart::Column { col: b, abs: ba }) => {
                let (c1, c2) = minmax(a, b);
                (
                    Coord::new(0, c1, false, aa),
                    Coord::new(UNBOUNDED, c2, false, ba),
                )
            }
            (RefPart::Row { row: a, abs: aa }, RefPart::Row { row: b, abs: ba }) => {
                let (r1, r2) = minmax(a, b);
                (
                    Coord::new(r1, 0, aa, false),
                    Coord::new(r2, UNBOUNDED, ba, false),
                )
            }
            _ => return Err(ParseError::at(offset, "mismatched range corners")),
        };
        match sheet {
            Some(None) => Ok(AstNode::ref_error()),
            Some(Some(id)) => Ok(AstNode::new(
                AstKind::RangeRef(RangeReference {
                    sheet: Some(id),
                    start,
                    end,
                }),
                false,
            )),
            None => Ok(AstNode::new(
                AstKind::RangeRef(RangeReference {
                    sheet: None,
                    start,
                    end,
                }),
                false,
            )),
        }
    }
}

fn resolve_cell(sheet: Option<Option<SheetId>>, coord: Coord) -> AstNode {
    match sheet {
        Some(None) => AstNode::ref_error(),
        Some(Some(id)) => AstNode::new(
            AstKind::CellRef(CellReference {
                sheet: Some(id),
                coord,
            }),
            false,
        ),
        None => AstNode::new(
            AstKind::CellRef(CellReference {
                sheet: None,
                coord,
            }),
            false,
        ),
    }
}

fn minmax(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// 1-based positive integral row in text -> 0-based index.
fn integral_row(n: f64) -> Option<u32> {
    if n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64 {
        Some(n as u32 - 1)
    } else {
        None
    }
}

/// Parses one corner of a reference: `$A$1`, `B2`, `$C`, `D`.
fn parse_ref_part(s: &str) -> Option<RefPart> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let col_abs = bytes.first() == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let col = if i > col_start {
        let letters: String = s[col_start..i].to_ascii_uppercase();
        Some(Coord::letters_to_col(&letters)?)
    } else {
        None
    };
    let row_abs = bytes.get(i) == Some(&b'$');
    if row_abs {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i != bytes.len() {
        return None;
    }
    let row = if i > row_start {
        let n: u32 = s[row_start..i].parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(n - 1)
    } else {
        None
    };
    match (col, row) {
        (Some(col), Some(row)) => Some(RefPart::Cell {
            coord: Coord::new(row, col, row_abs, col_abs),
        }),
        (Some(col), None) if !row_abs => Some(RefPart::Column { col, abs: col_abs }),
        (None, Some(row)) if !col_abs => Some(RefPart::Row { row, abs: row_abs }),
        _ => None,
    }
}

/// A named-expression name: identifier-shaped and not confusable with an
/// A1 cell reference. Pure letters are fine ("Rate"); letters followed by
/// digits are not ("A1").
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return false;
    }
    !matches!(parse_ref_part(name), Some(RefPart::Cell { .. }))
}
