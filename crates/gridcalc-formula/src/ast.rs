use std::sync::Arc;

use gridcalc_common::{CellAddr, ErrorKind, RangeAddr, SheetLimits, SheetTab};
use smallvec::SmallVec;

/* ───────────────────────────── References ───────────────────────────── */

/// Which sheet a reference points at. `explicit` records whether the
/// formula text carried a sheet qualifier, so rendering can reproduce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetScope {
    pub tab: SheetTab,
    pub explicit: bool,
}

impl SheetScope {
    pub const fn local(tab: SheetTab) -> Self {
        Self {
            tab,
            explicit: false,
        }
    }

    pub const fn qualified(tab: SheetTab) -> Self {
        Self {
            tab,
            explicit: true,
        }
    }
}

/// One corner of a reference: an absolute position plus the `$` anchors
/// that govern how it moves when a formula is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefPoint {
    pub col: u32,
    pub row: u32,
    pub col_abs: bool,
    pub row_abs: bool,
}

impl RefPoint {
    pub const fn relative(col: u32, row: u32) -> Self {
        Self {
            col,
            row,
            col_abs: false,
            row_abs: false,
        }
    }

    pub const fn absolute(col: u32, row: u32) -> Self {
        Self {
            col,
            row,
            col_abs: true,
            row_abs: true,
        }
    }

    pub fn with_position(self, col: u32, row: u32) -> Self {
        Self { col, row, ..self }
    }

    fn shifted(self, dcol: i64, drow: i64, limits: &SheetLimits) -> Option<Self> {
        let col = if self.col_abs {
            self.col
        } else {
            u32::try_from(self.col as i64 + dcol).ok()?
        };
        let row = if self.row_abs {
            self.row
        } else {
            u32::try_from(self.row as i64 + drow).ok()?
        };
        (limits.valid_col(col) && limits.valid_row(row)).then_some(self.with_position(col, row))
    }
}

/// A compiled cell or area reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Cell {
        sheet: SheetScope,
        at: RefPoint,
    },
    Area {
        sheet: SheetScope,
        start: RefPoint,
        end: RefPoint,
    },
    /// A reference whose target no longer exists; evaluates to `#REF!`.
    Invalid,
}

impl Reference {
    pub fn cell(tab: SheetTab, col: u32, row: u32) -> Self {
        Reference::Cell {
            sheet: SheetScope::local(tab),
            at: RefPoint::relative(col, row),
        }
    }

    pub fn area(tab: SheetTab, col1: u32, row1: u32, col2: u32, row2: u32) -> Self {
        Reference::Area {
            sheet: SheetScope::local(tab),
            start: RefPoint::relative(col1, row1),
            end: RefPoint::relative(col2, row2),
        }
    }

    pub fn tab(&self) -> Option<SheetTab> {
        match self {
            Reference::Cell { sheet, .. } | Reference::Area { sheet, .. } => Some(sheet.tab),
            Reference::Invalid => None,
        }
    }

    /// The addressed rectangle, or `None` for an invalid reference.
    pub fn range(&self) -> Option<RangeAddr> {
        match self {
            Reference::Cell { sheet, at } => {
                Some(RangeAddr::single(CellAddr::new(sheet.tab, at.col, at.row)))
            }
            Reference::Area { sheet, start, end } => Some(RangeAddr::new(
                sheet.tab, start.col, start.row, end.col, end.row,
            )),
            Reference::Invalid => None,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Reference::Invalid)
    }

    /// Shift the relative components by `(dcol, drow)`, as when a formula is
    /// copied. Positions pushed outside `limits` become [`Reference::Invalid`].
    pub fn rebased(&self, dcol: i64, drow: i64, limits: &SheetLimits) -> Reference {
        match self {
            Reference::Cell { sheet, at } => match at.shifted(dcol, drow, limits) {
                Some(at) => Reference::Cell { sheet: *sheet, at },
                None => Reference::Invalid,
            },
            Reference::Area { sheet, start, end } => {
                match (
                    start.shifted(dcol, drow, limits),
                    end.shifted(dcol, drow, limits),
                ) {
                    (Some(start), Some(end)) => Reference::Area {
                        sheet: *sheet,
                        start,
                        end,
                    },
                    _ => Reference::Invalid,
                }
            }
            Reference::Invalid => Reference::Invalid,
        }
    }
}

/* ──────────────────────────── Expressions ───────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
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
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    /// Binding strength; higher binds tighter. All binary operators are left-associative.
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 1,
            BinaryOp::Concat => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div => 4,
            BinaryOp::Pow => 5,
        }
    }
}

pub(crate) const UNARY_PRECEDENCE: u8 = 6;
pub(crate) const PERCENT_PRECEDENCE: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(Arc<str>),
    Bool(bool),
    Error(ErrorKind),
    Ref(Reference),
    /// An identifier that is neither a reference nor a function call.
    Name(Arc<str>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Percent(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: Arc<str>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => UNARY_PRECEDENCE,
            Expr::Percent(_) => PERCENT_PRECEDENCE,
            _ => u8::MAX,
        }
    }

    pub fn visit_references<'a>(&'a self, f: &mut impl FnMut(&'a Reference)) {
        match self {
            Expr::Ref(r) => f(r),
            Expr::Unary { operand, .. } | Expr::Percent(operand) => operand.visit_references(f),
            Expr::Binary { left, right, .. } => {
                left.visit_references(f);
                right.visit_references(f);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.visit_references(f);
                }
            }
            Expr::Number(_)
            | Expr::Text(_)
            | Expr::Bool(_)
            | Expr::Error(_)
            | Expr::Name(_) => {}
        }
    }

    fn visit_references_mut(&mut self, f: &mut impl FnMut(&mut Reference)) {
        match self {
            Expr::Ref(r) => f(r),
            Expr::Unary { operand, .. } | Expr::Percent(operand) => {
                operand.visit_references_mut(f)
            }
            Expr::Binary { left, right, .. } => {
                left.visit_references_mut(f);
                right.visit_references_mut(f);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.visit_references_mut(f);
                }
            }
            Expr::Number(_)
            | Expr::Text(_)
            | Expr::Bool(_)
            | Expr::Error(_)
            | Expr::Name(_) => {}
        }
    }

    fn calls_dynamic(&self) -> bool {
        match self {
            Expr::Call { name, args } => {
                is_dynamic_function(name) || args.iter().any(Expr::calls_dynamic)
            }
            Expr::Unary { operand, .. } | Expr::Percent(operand) => operand.calls_dynamic(),
            Expr::Binary { left, right, .. } => left.calls_dynamic() || right.calls_dynamic(),
            _ => false,
        }
    }
}

/// Functions whose dependencies are only known after evaluation.
pub fn is_dynamic_function(name: &str) -> bool {
    name.eq_ignore_ascii_case("INDIRECT")
}

/* ───────────────────────────── Formula ──────────────────────────────── */

/// A compiled formula: the expression tree plus facts derived from it once.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
    dynamic: bool,
}

impl Formula {
    pub fn new(expr: Expr) -> Self {
        let dynamic = expr.calls_dynamic();
        Self { expr, dynamic }
    }

    #[inline]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// True when the formula calls a function that resolves references at
    /// evaluation time.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn references(&self) -> SmallVec<[&Reference; 4]> {
        let mut out = SmallVec::new();
        self.expr.visit_references(&mut |r| out.push(r));
        out
    }

    /// Rectangles this formula reads statically (invalid references skipped).
    pub fn dependency_ranges(&self) -> SmallVec<[RangeAddr; 4]> {
        let mut out = SmallVec::new();
        self.expr.visit_references(&mut |r| {
            if let Some(range) = r.range() {
                out.push(range);
            }
        });
        out
    }

    pub fn has_invalid_reference(&self) -> bool {
        self.references().iter().any(|r| !r.is_valid())
    }

    /// True when the formula has references and none of them is valid.
    pub fn all_references_invalid(&self) -> bool {
        let refs = self.references();
        !refs.is_empty() && refs.iter().all(|r| !r.is_valid())
    }

    /// Rewrite every reference through `f`. Returns `None` when nothing changed.
    pub fn map_references(&self, mut f: impl FnMut(&Reference) -> Reference) -> Option<Formula> {
        let mut changed = false;
        let mut expr = self.expr.clone();
        expr.visit_references_mut(&mut |r| {
            let next = f(r);
            if next != *r {
                *r = next;
                changed = true;
            }
        });
        changed.then(|| Formula {
            expr,
            dynamic: self.dynamic,
        })
    }

    /// The formula as it would read after being copied by `(dcol, drow)`.
    pub fn rebased(&self, dcol: i64, drow: i64, limits: &SheetLimits) -> Formula {
        self.map_references(|r| r.rebased(dcol, drow, limits))
            .unwrap_or_else(|| self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_respects_anchors() {
        let limits = SheetLimits::default();
        let r = Reference::Cell {
            sheet: SheetScope::local(0),
            at: RefPoint {
                col: 2,
                row: 5,
                col_abs: true,
                row_abs: false,
            },
        };
        assert_eq!(
            r.rebased(3, 2, &limits),
            Reference::Cell {
                sheet: SheetScope::local(0),
                at: RefPoint {
                    col: 2,
                    row: 7,
                    col_abs: true,
                    row_abs: false
                },
            }
        );
        assert_eq!(r.rebased(0, -6, &limits), Reference::Invalid);
    }

    #[test]
    fn map_references_reports_no_change() {
        let f = Formula::new(Expr::Ref(Reference::cell(0, 0, 0)));
        assert!(f.map_references(|r| r.clone()).is_none());
        let moved = f.map_references(|_| Reference::cell(0, 0, 1)).unwrap();
        assert_eq!(moved.dependency_ranges()[0].row1, 1);
    }
}
