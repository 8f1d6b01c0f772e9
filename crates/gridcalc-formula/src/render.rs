//! Canonical text rendering of compiled formulas.

use std::fmt::Write;

use gridcalc_common::{SheetTab, col_to_letters};

use crate::ast::{Expr, Formula, RefPoint, Reference, SheetScope, UnaryOp};
use crate::parser::SheetNames;

impl Formula {
    /// A1 text with a leading `=`, as typed by a user on sheet `tab`.
    pub fn to_text(&self, names: &dyn SheetNames, tab: SheetTab) -> String {
        let mut out = String::from("=");
        write_expr(self.expr(), &mut out, &mut |r, out| {
            write_a1_reference(r, names, tab, out)
        });
        out
    }

    /// Position-independent R1C1 form relative to `(col, row)`.
    ///
    /// Two cells whose formulas have the same signature compute the same
    /// expression over their own neighbourhood, which is what makes them
    /// candidates for sharing a formula group.
    pub fn signature(&self, col: u32, row: u32) -> String {
        let mut out = String::new();
        write_expr(self.expr(), &mut out, &mut |r, out| {
            write_r1c1_reference(r, col, row, out)
        });
        out
    }
}

fn write_expr(expr: &Expr, out: &mut String, refs: &mut impl FnMut(&Reference, &mut String)) {
    match expr {
        Expr::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Expr::Text(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        }
        Expr::Bool(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
        Expr::Error(e) => out.push_str(e.code()),
        Expr::Ref(r) => refs(r, out),
        Expr::Name(n) => out.push_str(n),
        Expr::Unary { op, operand } => {
            out.push(match op {
                UnaryOp::Neg => '-',
                UnaryOp::Plus => '+',
            });
            write_operand(operand, expr.precedence(), false, out, refs);
        }
        Expr::Percent(operand) => {
            write_operand(operand, expr.precedence(), false, out, refs);
            out.push('%');
        }
        Expr::Binary { op, left, right } => {
            let prec = op.precedence();
            write_operand(left, prec, false, out, refs);
            out.push_str(op.symbol());
            write_operand(right, prec, true, out, refs);
        }
        Expr::Call { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_expr(arg, out, refs);
            }
            out.push(')');
        }
    }
}

fn write_operand(
    child: &Expr,
    parent_prec: u8,
    right_side: bool,
    out: &mut String,
    refs: &mut impl FnMut(&Reference, &mut String),
) {
    let child_prec = child.precedence();
    let needs_parens = child_prec < parent_prec || (right_side && child_prec == parent_prec);
    if needs_parens {
        out.push('(');
        write_expr(child, out, refs);
        out.push(')');
    } else {
        write_expr(child, out, refs);
    }
}

fn write_sheet_prefix(sheet: &SheetScope, names: &dyn SheetNames, tab: SheetTab, out: &mut String) {
    if !sheet.explicit && sheet.tab == tab {
        return;
    }
    match names.name_of(sheet.tab) {
        Some(name) if is_plain_sheet_name(name) => out.push_str(name),
        Some(name) => {
            out.push('\'');
            out.push_str(&name.replace('\'', "''"));
            out.push('\'');
        }
        None => out.push_str("#REF"),
    }
    out.push('!');
}

fn is_plain_sheet_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn write_a1_point(p: &RefPoint, out: &mut String) {
    if p.col_abs {
        out.push('$');
    }
    out.push_str(&col_to_letters(p.col));
    if p.row_abs {
        out.push('$');
    }
    let _ = write!(out, "{}", p.row + 1);
}

fn write_a1_reference(r: &Reference, names: &dyn SheetNames, tab: SheetTab, out: &mut String) {
    match r {
        Reference::Cell { sheet, at } => {
            write_sheet_prefix(sheet, names, tab, out);
            write_a1_point(at, out);
        }
        Reference::Area { sheet, start, end } => {
            write_sheet_prefix(sheet, names, tab, out);
            write_a1_point(start, out);
            out.push(':');
            write_a1_point(end, out);
        }
        Reference::Invalid => out.push_str("#REF!"),
    }
}

fn write_r1c1_point(p: &RefPoint, col: u32, row: u32, out: &mut String) {
    if p.row_abs {
        let _ = write!(out, "R{}", p.row + 1);
    } else {
        let _ = write!(out, "R[{}]", p.row as i64 - row as i64);
    }
    if p.col_abs {
        let _ = write!(out, "C{}", p.col + 1);
    } else {
        let _ = write!(out, "C[{}]", p.col as i64 - col as i64);
    }
}

fn write_r1c1_reference(r: &Reference, col: u32, row: u32, out: &mut String) {
    match r {
        Reference::Cell { sheet, at } => {
            let _ = write!(out, "{}!", sheet.tab);
            write_r1c1_point(at, col, row, out);
        }
        Reference::Area { sheet, start, end } => {
            let _ = write!(out, "{}!", sheet.tab);
            write_r1c1_point(start, col, row, out);
            out.push(':');
            write_r1c1_point(end, col, row, out);
        }
        Reference::Invalid => out.push_str("#REF!"),
    }
}

#[cfg(test)]
mod tests {
    use gridcalc_common::SheetLimits;

    use crate::parser::{ParseContext, parse_formula};

    fn round_trip(text: &str) -> String {
        let names = vec!["Sheet1", "My Data"];
        let ctx = ParseContext::new(0, &names, SheetLimits::default());
        parse_formula(text, &ctx).unwrap().to_text(&names, 0)
    }

    #[test]
    fn renders_canonical_text() {
        assert_eq!(round_trip("=a1 * ( b2 + 3 )"), "=A1*(B2+3)");
        assert_eq!(round_trip("=10-(4-3)"), "=10-(4-3)");
        assert_eq!(round_trip("=(10-4)-3"), "=10-4-3");
        assert_eq!(round_trip("='My Data'!$A$1:B2"), "='My Data'!$A$1:B2");
        assert_eq!(round_trip("=-A1^2"), "=-A1^2");
        assert_eq!(round_trip("=50%&\"a\"\"b\""), "=50%&\"a\"\"b\"");
        assert_eq!(round_trip("=if(A1>0,1,0)"), "=IF(A1>0,1,0)");
    }

    #[test]
    fn signature_is_position_independent() {
        let names = vec!["Sheet1"];
        let ctx = ParseContext::new(0, &names, SheetLimits::default());
        let a = parse_formula("=A1*2", &ctx).unwrap();
        let b = parse_formula("=A2*2", &ctx).unwrap();
        let c = parse_formula("=$A$1*2", &ctx).unwrap();
        assert_eq!(a.signature(1, 0), b.signature(1, 1));
        assert_eq!(a.signature(1, 0), "0!R[0]C[-1]*2");
        assert_eq!(c.signature(1, 0), c.signature(1, 1));
    }
}
