//! A1-notation formula parser.
//!
//! Parsing and compilation happen in one step: sheet names are resolved to
//! tab positions through [`SheetNames`] while the tree is built, so the
//! resulting [`Formula`] carries only positional references.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use gridcalc_common::{ErrorKind, SheetLimits, SheetTab, letters_to_col};

use crate::ast::{BinaryOp, Expr, Formula, RefPoint, Reference, SheetScope, UnaryOp};

/// Failure to parse formula text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.pos)
    }
}

impl Error for ParseError {}

/// Resolves sheet names to tabs and back.
pub trait SheetNames {
    fn tab_of(&self, name: &str) -> Option<SheetTab>;
    fn name_of(&self, tab: SheetTab) -> Option<&str>;
}

impl<S: AsRef<str>> SheetNames for [S] {
    fn tab_of(&self, name: &str) -> Option<SheetTab> {
        self.iter()
            .position(|s| s.as_ref().eq_ignore_ascii_case(name))
            .and_then(|i| SheetTab::try_from(i).ok())
    }

    fn name_of(&self, tab: SheetTab) -> Option<&str> {
        self.get(tab as usize).map(AsRef::as_ref)
    }
}

impl<S: AsRef<str>> SheetNames for Vec<S> {
    fn tab_of(&self, name: &str) -> Option<SheetTab> {
        self.as_slice().tab_of(name)
    }

    fn name_of(&self, tab: SheetTab) -> Option<&str> {
        self.as_slice().name_of(tab)
    }
}

/// Everything the parser needs to know about where a formula lives.
pub struct ParseContext<'a> {
    pub tab: SheetTab,
    pub names: &'a dyn SheetNames,
    pub limits: SheetLimits,
}

impl<'a> ParseContext<'a> {
    pub fn new(tab: SheetTab, names: &'a dyn SheetNames, limits: SheetLimits) -> Self {
        Self { tab, names, limits }
    }
}

/// Parse formula text (leading `=` optional) into a compiled [`Formula`].
pub fn parse_formula(text: &str, ctx: &ParseContext<'_>) -> Result<Formula, ParseError> {
    let body = text.strip_prefix('=').unwrap_or(text);
    let offset = text.len() - body.len();
    let tokens = Lexer::new(body, offset).run()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        ctx,
    };
    let expr = parser.expression(0)?;
    if let Some(tok) = parser.peek() {
        return Err(ParseError::new(
            format!("unexpected {}", tok.kind.describe()),
            tok.pos,
        ));
    }
    Ok(Formula::new(expr))
}

/// Parse a bare reference such as `B2`, `$A$1:C3` or `'Other sheet'!A1`.
/// Used by functions that turn text into references.
pub fn parse_reference(text: &str, ctx: &ParseContext<'_>) -> Option<Reference> {
    match parse_formula(text.trim(), ctx).ok()?.expr() {
        Expr::Ref(r) => Some(r.clone()),
        _ => None,
    }
}

/* ─────────────────────────────── Lexer ─────────────────────────────── */

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Text(String),
    Error(ErrorKind),
    Ident(String),
    QuotedSheet(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Colon,
    Bang,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Text(_) => "string literal".to_string(),
            TokenKind::Error(e) => format!("error literal {e}"),
            TokenKind::Ident(s) => format!("'{s}'"),
            TokenKind::QuotedSheet(s) => format!("sheet name '{s}'"),
            TokenKind::Op(op) => format!("operator '{op}'"),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Bang => "'!'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

struct Lexer<'s> {
    src: &'s str,
    bytes: &'s [u8],
    at: usize,
    base: usize,
    out: Vec<Token>,
}

impl<'s> Lexer<'s> {
    fn new(src: &'s str, base: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            at: 0,
            base,
            out: Vec::with_capacity(src.len() / 2 + 1),
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.out.push(Token {
            kind,
            pos: self.base + start,
        });
    }

    fn err(&self, message: impl Into<String>, at: usize) -> ParseError {
        ParseError::new(message, self.base + at)
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(&b) = self.bytes.get(self.at) {
            let start = self.at;
            match b {
                b' ' | b'\t' | b'\n' | b'\r' => self.at += 1,
                b'0'..=b'9' | b'.' => self.number()?,
                b'"' => self.string()?,
                b'\'' => self.quoted_sheet()?,
                b'#' => self.error_literal()?,
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b',' | b';' => self.single(TokenKind::Comma),
                b':' => self.single(TokenKind::Colon),
                b'!' => self.single(TokenKind::Bang),
                b'+' => self.single(TokenKind::Op("+")),
                b'-' => self.single(TokenKind::Op("-")),
                b'*' => self.single(TokenKind::Op("*")),
                b'/' => self.single(TokenKind::Op("/")),
                b'^' => self.single(TokenKind::Op("^")),
                b'&' => self.single(TokenKind::Op("&")),
                b'%' => self.single(TokenKind::Op("%")),
                b'=' => self.single(TokenKind::Op("=")),
                b'<' => match self.bytes.get(self.at + 1) {
                    Some(b'=') => self.double(TokenKind::Op("<=")),
                    Some(b'>') => self.double(TokenKind::Op("<>")),
                    _ => self.single(TokenKind::Op("<")),
                },
                b'>' => match self.bytes.get(self.at + 1) {
                    Some(b'=') => self.double(TokenKind::Op(">=")),
                    _ => self.single(TokenKind::Op(">")),
                },
                b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80 => {
                    self.ident()
                }
                _ => {
                    let ch = self.src[start..].chars().next().unwrap_or('?');
                    return Err(self.err(format!("unexpected character '{ch}'"), start));
                }
            }
        }
        Ok(self.out)
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.at;
        self.at += 1;
        self.push(kind, start);
    }

    fn double(&mut self, kind: TokenKind) {
        let start = self.at;
        self.at += 2;
        self.push(kind, start);
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.at;
        while matches!(self.bytes.get(self.at), Some(b'0'..=b'9' | b'.')) {
            self.at += 1;
        }
        if matches!(self.bytes.get(self.at), Some(b'e' | b'E')) {
            let mut look = self.at + 1;
            if matches!(self.bytes.get(look), Some(b'+' | b'-')) {
                look += 1;
            }
            if matches!(self.bytes.get(look), Some(b'0'..=b'9')) {
                self.at = look;
                while matches!(self.bytes.get(self.at), Some(b'0'..=b'9')) {
                    self.at += 1;
                }
            }
        }
        let text = &self.src[start..self.at];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.err(format!("invalid number '{text}'"), start))?;
        self.push(TokenKind::Number(value), start);
        Ok(())
    }

    /// Reads a delimited literal where a doubled delimiter is an escape.
    fn delimited(&mut self, delim: u8, what: &str) -> Result<String, ParseError> {
        let start = self.at;
        self.at += 1;
        let mut out = String::new();
        let mut seg = self.at;
        loop {
            match self.bytes.get(self.at) {
                None => return Err(self.err(format!("unterminated {what}"), start)),
                Some(&b) if b == delim => {
                    out.push_str(&self.src[seg..self.at]);
                    if self.bytes.get(self.at + 1) == Some(&delim) {
                        out.push(delim as char);
                        self.at += 2;
                        seg = self.at;
                    } else {
                        self.at += 1;
                        return Ok(out);
                    }
                }
                Some(_) => self.at += 1,
            }
        }
    }

    fn string(&mut self) -> Result<(), ParseError> {
        let start = self.at;
        let text = self.delimited(b'"', "string literal")?;
        self.push(TokenKind::Text(text), start);
        Ok(())
    }

    fn quoted_sheet(&mut self) -> Result<(), ParseError> {
        let start = self.at;
        let name = self.delimited(b'\'', "quoted sheet name")?;
        self.push(TokenKind::QuotedSheet(name), start);
        Ok(())
    }

    fn error_literal(&mut self) -> Result<(), ParseError> {
        let start = self.at;
        for kind in ErrorKind::ALL {
            let code = kind.code().as_bytes();
            let end = start + code.len();
            if end <= self.bytes.len() && self.bytes[start..end].eq_ignore_ascii_case(code) {
                self.at = end;
                self.push(TokenKind::Error(kind), start);
                return Ok(());
            }
        }
        Err(self.err("unknown error literal", start))
    }

    fn ident(&mut self) {
        let start = self.at;
        while let Some(&b) = self.bytes.get(self.at) {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$') || b >= 0x80 {
                self.at += 1;
            } else {
                break;
            }
        }
        let text = self.src[start..self.at].to_string();
        self.push(TokenKind::Ident(text), start);
    }
}

/* ─────────────────────────────── Parser ────────────────────────────── */

struct Parser<'c, 'a> {
    tokens: Vec<Token>,
    pos: usize,
    ctx: &'c ParseContext<'a>,
}

fn binary_op(sym: &str) -> Option<BinaryOp> {
    Some(match sym {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "^" => BinaryOp::Pow,
        "&" => BinaryOp::Concat,
        "=" => BinaryOp::Eq,
        "<>" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        _ => return None,
    })
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn end_pos(&self) -> usize {
        self.tokens.last().map(|t| t.pos + 1).unwrap_or(0)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::new("unexpected end of formula", self.end_pos()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", kind.describe(), tok.kind.describe()),
                tok.pos,
            ))
        }
    }

    /// Precedence climbing over the binary operators.
    fn expression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.prefix()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Op("%")) => {
                    self.pos += 1;
                    left = Expr::Percent(Box::new(left));
                    continue;
                }
                Some(TokenKind::Op(sym)) => match binary_op(sym) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.expression(prec + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Op("-")) => Some(UnaryOp::Neg),
            Some(TokenKind::Op("+")) => Some(UnaryOp::Plus),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let operand = self.prefix()?;
                let operand = self.postfix_percent(operand);
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.primary(),
        }
    }

    fn postfix_percent(&mut self, mut expr: Expr) -> Expr {
        while self.peek_kind() == Some(&TokenKind::Op("%")) {
            self.pos += 1;
            expr = Expr::Percent(Box::new(expr));
        }
        expr
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Text(s) => Ok(Expr::Text(Arc::from(s))),
            TokenKind::Error(e) => Ok(Expr::Error(e)),
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::QuotedSheet(name) => {
                self.expect(TokenKind::Bang)?;
                self.qualified_reference(&name)
            }
            TokenKind::Ident(name) => self.identifier(name),
            other => Err(ParseError::new(
                format!("unexpected {}", other.describe()),
                tok.pos,
            )),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let args = self.arguments()?;
                return Ok(Expr::Call {
                    name: Arc::from(name.to_ascii_uppercase()),
                    args,
                });
            }
            Some(TokenKind::Bang) => {
                self.pos += 1;
                return self.qualified_reference(&name);
            }
            _ => {}
        }
        if let Some(point) = self.ref_point(&name) {
            return self.reference_tail(SheetScope::local(self.ctx.tab), point);
        }
        if name.eq_ignore_ascii_case("TRUE") {
            return Ok(Expr::Bool(true));
        }
        if name.eq_ignore_ascii_case("FALSE") {
            return Ok(Expr::Bool(false));
        }
        Ok(Expr::Name(Arc::from(name)))
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek_kind() == Some(&TokenKind::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression(0)?);
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                other => {
                    return Err(ParseError::new(
                        format!("expected ',' or ')', found {}", other.describe()),
                        tok.pos,
                    ));
                }
            }
        }
    }

    /// `Sheet!A1` or `Sheet!A1:B2`; an unknown sheet compiles to `#REF!`.
    fn qualified_reference(&mut self, sheet: &str) -> Result<Expr, ParseError> {
        let tok = self.next()?;
        let point = match &tok.kind {
            TokenKind::Ident(s) => self.ref_point(s),
            _ => None,
        }
        .ok_or_else(|| ParseError::new("expected a cell reference after '!'", tok.pos))?;
        match self.ctx.names.tab_of(sheet) {
            Some(tab) => self.reference_tail(SheetScope::qualified(tab), point),
            None => {
                // consume a trailing area end so the rest still parses
                self.reference_tail(SheetScope::qualified(0), point)?;
                Ok(Expr::Ref(Reference::Invalid))
            }
        }
    }

    fn reference_tail(&mut self, sheet: SheetScope, start: RefPoint) -> Result<Expr, ParseError> {
        if self.peek_kind() != Some(&TokenKind::Colon) {
            return Ok(Expr::Ref(Reference::Cell { sheet, at: start }));
        }
        self.pos += 1;
        let tok = self.next()?;
        let end = match &tok.kind {
            TokenKind::Ident(s) => self.ref_point(s),
            _ => None,
        }
        .ok_or_else(|| ParseError::new("expected a cell reference after ':'", tok.pos))?;
        Ok(Expr::Ref(Reference::Area { sheet, start, end }))
    }

    /// Parse `$A$1`-style text into a point, checking document bounds.
    fn ref_point(&self, text: &str) -> Option<RefPoint> {
        let bytes = text.as_bytes();
        let mut i = 0;
        let col_abs = bytes.first() == Some(&b'$');
        if col_abs {
            i += 1;
        }
        let letters_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let letters = &text[letters_start..i];
        let row_abs = bytes.get(i) == Some(&b'$');
        if row_abs {
            i += 1;
        }
        let digits = &text[i..];
        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let col = letters_to_col(letters)?;
        let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
        let limits = &self.ctx.limits;
        (limits.valid_col(col) && limits.valid_row(row)).then_some(RefPoint {
            col,
            row,
            col_abs,
            row_abs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(names: &'a Vec<&'static str>) -> ParseContext<'a> {
        ParseContext::new(0, names, SheetLimits::default())
    }

    fn parse(text: &str) -> Expr {
        let names = vec!["Sheet1", "Data"];
        parse_formula(text, &ctx(&names)).unwrap().expr().clone()
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse("=1+2*3");
        let Expr::Binary { op, right, .. } = e else {
            panic!("expected binary")
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));

        let e = parse("=10-4-3");
        let Expr::Binary { left, .. } = e else {
            panic!("expected binary")
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn references_and_sheets() {
        let e = parse("=Data!$B$2:C10");
        assert_eq!(
            e,
            Expr::Ref(Reference::Area {
                sheet: SheetScope::qualified(1),
                start: RefPoint::absolute(1, 1),
                end: RefPoint::relative(2, 9),
            })
        );
        assert_eq!(parse("='Missing'!A1"), Expr::Ref(Reference::Invalid));
        assert_eq!(parse("=a1"), Expr::Ref(Reference::cell(0, 0, 0)));
    }

    #[test]
    fn calls_literals_and_names() {
        let e = parse("=sum(A1:A3, 2, \"x\"\"y\", TRUE, #DIV/0!)");
        let Expr::Call { name, args } = e else {
            panic!("expected call")
        };
        assert_eq!(&*name, "SUM");
        assert_eq!(args.len(), 5);
        assert_eq!(args[2], Expr::Text(Arc::from("x\"y")));
        assert_eq!(args[4], Expr::Error(ErrorKind::Div0));
        assert_eq!(parse("=Revenue"), Expr::Name(Arc::from("Revenue")));
    }

    #[test]
    fn dynamic_detection() {
        let names = vec!["Sheet1"];
        let f = parse_formula("=1+INDIRECT(\"A1\")", &ctx(&names)).unwrap();
        assert!(f.is_dynamic());
        let f = parse_formula("=SUM(A1:A2)", &ctx(&names)).unwrap();
        assert!(!f.is_dynamic());
    }

    #[test]
    fn errors_carry_positions() {
        let names = vec!["Sheet1"];
        let err = parse_formula("=1+", &ctx(&names)).unwrap_err();
        assert_eq!(err.message, "unexpected end of formula");
        let err = parse_formula("=(1", &ctx(&names)).unwrap_err();
        assert!(err.message.contains("end of formula"));
        let err = parse_formula("=1 ~ 2", &ctx(&names)).unwrap_err();
        assert_eq!(err.pos, 3);
    }

    #[test]
    fn out_of_bounds_reference_is_a_name() {
        let names = vec!["Sheet1"];
        let small = ParseContext::new(0, &names, SheetLimits::new(9, 9));
        let f = parse_formula("=K1", &small).unwrap();
        assert_eq!(f.expr(), &Expr::Name(Arc::from("K1")));
    }

    #[test]
    fn parse_reference_accepts_only_references() {
        let names = vec!["Sheet1", "Data"];
        let c = ctx(&names);
        assert_eq!(parse_reference("B3", &c), Some(Reference::cell(0, 1, 2)));
        assert_eq!(parse_reference("1+2", &c), None);
    }
}
