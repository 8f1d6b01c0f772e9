//! Expression interpreter.
//!
//! Evaluation reads a frozen document plus a result overlay for cells
//! already computed in the current pass. Reading a formula cell that is
//! still dirty suspends the evaluation with [`Suspend`]; the driver settles
//! that cell first and then restarts this one.

use std::cmp::Ordering;
use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, ErrorKind, RangeAddr};
use gridcalc_formula::{BinaryOp, Expr, Formula, ParseContext, Reference, UnaryOp, parse_reference};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::FormulaId;
use crate::cell::Cell;
use crate::context::NumberContext;
use crate::document::Document;

/// Evaluation cannot finish until formula `0` has been settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Suspend(pub FormulaId);

type Eval<T> = Result<T, Suspend>;

/// Per-thread scratch state.
#[derive(Debug, Default)]
pub(crate) struct EvalContext {
    number: NumberContext,
    number_text: FxHashMap<u64, Arc<str>>,
}

impl EvalContext {
    pub(crate) fn new(number: NumberContext) -> Self {
        Self {
            number,
            number_text: FxHashMap::default(),
        }
    }

    fn number_to_text(&mut self, n: f64) -> Arc<str> {
        let number = &self.number;
        self.number_text
            .entry(n.to_bits())
            .or_insert_with(|| Arc::from(number.number_to_text(n)))
            .clone()
    }

    fn to_text(&mut self, v: &CellValue) -> Result<Arc<str>, ErrorKind> {
        match v {
            CellValue::Number(n) => Ok(self.number_to_text(*n)),
            CellValue::Text(s) => Ok(s.clone()),
            other => other.to_text().map(Arc::from),
        }
    }
}

/// A function argument before it is reduced to a scalar.
enum Operand {
    Scalar(CellValue),
    Area(RangeAddr),
}

pub(crate) struct Interpreter<'e> {
    doc: &'e Document,
    overlay: &'e FxHashMap<FormulaId, CellValue>,
    ctx: &'e mut EvalContext,
    pos: CellAddr,
    /// Areas reached through `INDIRECT` during this evaluation.
    pub(crate) dynamic: SmallVec<[RangeAddr; 2]>,
}

impl<'e> Interpreter<'e> {
    pub(crate) fn new(
        doc: &'e Document,
        overlay: &'e FxHashMap<FormulaId, CellValue>,
        ctx: &'e mut EvalContext,
        pos: CellAddr,
    ) -> Self {
        Self {
            doc,
            overlay,
            ctx,
            pos,
            dynamic: SmallVec::new(),
        }
    }

    /// Evaluate a whole formula to the value stored as its result.
    pub(crate) fn run(&mut self, formula: &Formula) -> Eval<CellValue> {
        let v = self.scalar(formula.expr())?;
        Ok(match v {
            CellValue::Empty => CellValue::Number(0.0),
            CellValue::Number(n) if !n.is_finite() => CellValue::Error(ErrorKind::Num),
            other => other,
        })
    }

    /* ────────────────────────────── Reads ───────────────────────────── */

    pub(crate) fn cell_value(&self, addr: CellAddr) -> Eval<CellValue> {
        let Some(table) = self.doc.tables.get(addr.tab as usize) else {
            return Ok(CellValue::Error(ErrorKind::Ref));
        };
        Ok(match table.column(addr.col).cell(addr.row) {
            None => CellValue::Empty,
            Some(Cell::Numeric(n)) => CellValue::Number(*n),
            Some(Cell::Text(s)) => CellValue::text(s.as_str()),
            Some(Cell::EditText(rt)) => CellValue::text(rt.plain_text()),
            Some(Cell::Formula(id)) => return self.formula_value(*id),
        })
    }

    fn formula_value(&self, id: FormulaId) -> Eval<CellValue> {
        if let Some(v) = self.overlay.get(&id) {
            return Ok(v.clone());
        }
        match self.doc.deps.formulas.get(id) {
            Some(cell) if cell.dirty => Err(Suspend(id)),
            Some(cell) => Ok(cell.result.clone()),
            None => Ok(CellValue::Empty),
        }
    }

    /// Values of the non-empty cells of `range`, row-major within columns.
    fn area_values(&self, range: &RangeAddr) -> Eval<Vec<CellValue>> {
        let mut out = Vec::new();
        let Some(table) = self.doc.tables.get(range.tab as usize) else {
            out.push(CellValue::Error(ErrorKind::Ref));
            return Ok(out);
        };
        let Some((c1, c2)) = table.clamp_to_allocated(range.col1, range.col2) else {
            return Ok(out);
        };
        for col in c1..=c2 {
            for (_, cell) in table.column(col).iter_range(range.row1, range.row2) {
                out.push(match cell {
                    Cell::Numeric(n) => CellValue::Number(*n),
                    Cell::Text(s) => CellValue::text(s.as_str()),
                    Cell::EditText(rt) => CellValue::text(rt.plain_text()),
                    Cell::Formula(id) => self.formula_value(*id)?,
                });
            }
        }
        Ok(out)
    }

    /* ─────────────────────────── Expressions ────────────────────────── */

    fn operand(&mut self, expr: &Expr) -> Eval<Operand> {
        match expr {
            Expr::Ref(Reference::Area { sheet, start, end }) => Ok(Operand::Area(RangeAddr::new(
                sheet.tab, start.col, start.row, end.col, end.row,
            ))),
            Expr::Call { name, args } if &**name == "INDIRECT" => self.indirect(args),
            other => self.scalar(other).map(Operand::Scalar),
        }
    }

    fn reduce(&self, op: Operand) -> Eval<CellValue> {
        match op {
            Operand::Scalar(v) => Ok(v),
            Operand::Area(r) if r.is_single_cell() => self.cell_value(r.start()),
            Operand::Area(_) => Ok(CellValue::Error(ErrorKind::Value)),
        }
    }

    fn scalar(&mut self, expr: &Expr) -> Eval<CellValue> {
        Ok(match expr {
            Expr::Number(n) => CellValue::Number(*n),
            Expr::Text(s) => CellValue::Text(s.clone()),
            Expr::Bool(b) => CellValue::Bool(*b),
            Expr::Error(e) => CellValue::Error(*e),
            Expr::Name(_) => CellValue::Error(ErrorKind::Name),
            Expr::Ref(Reference::Cell { sheet, at }) => {
                self.cell_value(CellAddr::new(sheet.tab, at.col, at.row))?
            }
            Expr::Ref(Reference::Invalid) => CellValue::Error(ErrorKind::Ref),
            Expr::Ref(area @ Reference::Area { .. }) => {
                let op = self.operand(&Expr::Ref(area.clone()))?;
                self.reduce(op)?
            }
            Expr::Unary { op, operand } => {
                let v = self.scalar(operand)?;
                match v.to_number() {
                    Ok(n) => CellValue::Number(match op {
                        UnaryOp::Neg => -n,
                        UnaryOp::Plus => n,
                    }),
                    Err(e) => CellValue::Error(e),
                }
            }
            Expr::Percent(operand) => match self.scalar(operand)?.to_number() {
                Ok(n) => CellValue::Number(n / 100.0),
                Err(e) => CellValue::Error(e),
            },
            Expr::Binary { op, left, right } => {
                let l = self.scalar(left)?;
                let r = self.scalar(right)?;
                self.binary(*op, &l, &r)
            }
            Expr::Call { name, args } => self.call(name, args)?,
        })
    }

    fn binary(&mut self, op: BinaryOp, l: &CellValue, r: &CellValue) -> CellValue {
        match op {
            BinaryOp::Concat => {
                let joined = self
                    .ctx
                    .to_text(l)
                    .and_then(|a| self.ctx.to_text(r).map(|b| format!("{a}{b}")));
                match joined {
                    Ok(s) => CellValue::text(s),
                    Err(e) => CellValue::Error(e),
                }
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                match compare(l, r) {
                    Ok(ord) => CellValue::Bool(match op {
                        BinaryOp::Eq => ord == Ordering::Equal,
                        BinaryOp::Ne => ord != Ordering::Equal,
                        BinaryOp::Lt => ord == Ordering::Less,
                        BinaryOp::Le => ord != Ordering::Greater,
                        BinaryOp::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    }),
                    Err(e) => CellValue::Error(e),
                }
            }
            _ => {
                let (a, b) = match (l.to_number(), r.to_number()) {
                    (Ok(a), Ok(b)) => (a, b),
                    (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
                };
                let n = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div if b == 0.0 => return CellValue::Error(ErrorKind::Div0),
                    BinaryOp::Div => a / b,
                    _ => a.powf(b),
                };
                if n.is_finite() {
                    CellValue::Number(n)
                } else {
                    CellValue::Error(ErrorKind::Num)
                }
            }
        }
    }

    /* ──────────────────────────── Functions ─────────────────────────── */

    fn call(&mut self, name: &str, args: &[Expr]) -> Eval<CellValue> {
        Ok(match name {
            "SUM" | "AVERAGE" | "MIN" | "MAX" | "COUNT" => self.aggregate(name, args)?,
            "COUNTA" => {
                let mut n = 0usize;
                for arg in args {
                    match self.operand(arg)? {
                        Operand::Area(r) => {
                            n += self.area_values(&r)?.iter().filter(|v| !v.is_empty()).count()
                        }
                        Operand::Scalar(v) => n += usize::from(!v.is_empty()),
                    }
                }
                CellValue::Number(n as f64)
            }
            "IF" => {
                if !(1..=3).contains(&args.len()) {
                    return Ok(CellValue::Error(ErrorKind::Value));
                }
                match self.scalar(&args[0])?.to_bool() {
                    Ok(true) => match args.get(1) {
                        Some(e) => self.scalar(e)?,
                        None => CellValue::Bool(true),
                    },
                    Ok(false) => match args.get(2) {
                        Some(e) => self.scalar(e)?,
                        None => CellValue::Bool(false),
                    },
                    Err(e) => CellValue::Error(e),
                }
            }
            "AND" | "OR" => self.logical(name == "AND", args)?,
            "NOT" => match self.unary_arg(args)?.to_bool() {
                Ok(b) => CellValue::Bool(!b),
                Err(e) => CellValue::Error(e),
            },
            "ABS" => match self.unary_arg(args)?.to_number() {
                Ok(n) => CellValue::Number(n.abs()),
                Err(e) => CellValue::Error(e),
            },
            "ROUND" => {
                if args.is_empty() || args.len() > 2 {
                    return Ok(CellValue::Error(ErrorKind::Value));
                }
                let x = self.scalar(&args[0])?.to_number();
                let digits = match args.get(1) {
                    Some(e) => self.scalar(e)?.to_number(),
                    None => Ok(0.0),
                };
                match (x, digits) {
                    (Ok(x), Ok(d)) => CellValue::Number(round_to(x, d.trunc() as i32)),
                    (Err(e), _) | (_, Err(e)) => CellValue::Error(e),
                }
            }
            "CONCAT" => {
                let mut out = String::new();
                for arg in args {
                    let values = match self.operand(arg)? {
                        Operand::Area(r) => self.area_values(&r)?,
                        Operand::Scalar(v) => vec![v],
                    };
                    for v in values {
                        match self.ctx.to_text(&v) {
                            Ok(s) => out.push_str(&s),
                            Err(e) => return Ok(CellValue::Error(e)),
                        }
                    }
                }
                CellValue::text(out)
            }
            "LEN" | "UPPER" | "LOWER" => {
                let v = self.unary_arg(args)?;
                match self.ctx.to_text(&v) {
                    Ok(s) => match name {
                        "LEN" => CellValue::Number(s.chars().count() as f64),
                        "UPPER" => CellValue::text(s.to_uppercase()),
                        _ => CellValue::text(s.to_lowercase()),
                    },
                    Err(e) => CellValue::Error(e),
                }
            }
            "ISERROR" => CellValue::Bool(self.unary_arg(args)?.is_error()),
            "IFERROR" => {
                if args.len() != 2 {
                    return Ok(CellValue::Error(ErrorKind::Value));
                }
                match self.scalar(&args[0])? {
                    CellValue::Error(_) => self.scalar(&args[1])?,
                    v => v,
                }
            }
            "ROW" | "COLUMN" => {
                let at = match args {
                    [] => self.pos,
                    [Expr::Ref(r)] => match r.range() {
                        Some(range) => range.start(),
                        None => return Ok(CellValue::Error(ErrorKind::Ref)),
                    },
                    [arg] => match self.operand(arg)? {
                        Operand::Area(r) => r.start(),
                        Operand::Scalar(CellValue::Error(e)) => return Ok(CellValue::Error(e)),
                        Operand::Scalar(_) => return Ok(CellValue::Error(ErrorKind::Value)),
                    },
                    _ => return Ok(CellValue::Error(ErrorKind::Value)),
                };
                let n = if name == "ROW" { at.row } else { at.col };
                CellValue::Number(f64::from(n) + 1.0)
            }
            "INDIRECT" => {
                let op = self.indirect(args)?;
                self.reduce(op)?
            }
            _ => CellValue::Error(ErrorKind::Name),
        })
    }

    fn unary_arg(&mut self, args: &[Expr]) -> Eval<CellValue> {
        match args {
            [arg] => self.scalar(arg),
            _ => Ok(CellValue::Error(ErrorKind::Value)),
        }
    }

    fn aggregate(&mut self, name: &str, args: &[Expr]) -> Eval<CellValue> {
        let mut numbers: Vec<f64> = Vec::new();
        for arg in args {
            match self.operand(arg)? {
                Operand::Area(r) => {
                    for v in self.area_values(&r)? {
                        match v {
                            CellValue::Number(n) => numbers.push(n),
                            CellValue::Error(e) if name != "COUNT" => {
                                return Ok(CellValue::Error(e));
                            }
                            _ => {}
                        }
                    }
                }
                Operand::Scalar(v) => match (v.to_number(), name) {
                    (Ok(n), _) => numbers.push(n),
                    (Err(_), "COUNT") => {}
                    (Err(e), _) => return Ok(CellValue::Error(e)),
                },
            }
        }
        Ok(match name {
            "SUM" => CellValue::Number(numbers.iter().sum()),
            "COUNT" => CellValue::Number(numbers.len() as f64),
            "AVERAGE" if numbers.is_empty() => CellValue::Error(ErrorKind::Div0),
            "AVERAGE" => CellValue::Number(numbers.iter().sum::<f64>() / numbers.len() as f64),
            "MIN" => CellValue::Number(numbers.iter().copied().reduce(f64::min).unwrap_or(0.0)),
            _ => CellValue::Number(numbers.iter().copied().reduce(f64::max).unwrap_or(0.0)),
        })
    }

    fn logical(&mut self, all: bool, args: &[Expr]) -> Eval<CellValue> {
        let mut seen = false;
        let mut acc = all;
        for arg in args {
            let values = match self.operand(arg)? {
                Operand::Area(r) => self
                    .area_values(&r)?
                    .into_iter()
                    .filter(|v| !matches!(v, CellValue::Text(_)))
                    .collect(),
                Operand::Scalar(v) => vec![v],
            };
            for v in values {
                match v.to_bool() {
                    Ok(b) => {
                        seen = true;
                        acc = if all { acc && b } else { acc || b };
                    }
                    Err(e) => return Ok(CellValue::Error(e)),
                }
            }
        }
        Ok(if seen {
            CellValue::Bool(acc)
        } else {
            CellValue::Error(ErrorKind::Value)
        })
    }

    /// Resolve `INDIRECT(text)` to a reference and remember the target so
    /// the cell can listen to it after the pass.
    fn indirect(&mut self, args: &[Expr]) -> Eval<Operand> {
        let text = match args.first() {
            Some(e) if args.len() <= 2 => self.scalar(e)?,
            _ => return Ok(Operand::Scalar(CellValue::Error(ErrorKind::Value))),
        };
        let text = match self.ctx.to_text(&text) {
            Ok(t) => t,
            Err(e) => return Ok(Operand::Scalar(CellValue::Error(e))),
        };
        let pctx = ParseContext::new(self.pos.tab, self.doc, self.doc.config.limits);
        let Some(range) = parse_reference(&text, &pctx).and_then(|r| r.range()) else {
            return Ok(Operand::Scalar(CellValue::Error(ErrorKind::Ref)));
        };
        if !self.dynamic.contains(&range) {
            self.dynamic.push(range);
        }
        Ok(Operand::Area(range))
    }
}

/// Excel-style comparison: numbers sort before text before booleans, text
/// compares case-insensitively, and an empty operand takes the other
/// side's type.
fn compare(l: &CellValue, r: &CellValue) -> Result<Ordering, ErrorKind> {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) | CellValue::Empty => 0,
            CellValue::Text(_) => 1,
            _ => 2,
        }
    }
    match (l, r) {
        (CellValue::Error(e), _) | (_, CellValue::Error(e)) => Err(*e),
        (CellValue::Empty, CellValue::Text(s)) => Ok("".cmp(&*s.to_lowercase())),
        (CellValue::Text(s), CellValue::Empty) => Ok(s.to_lowercase().as_str().cmp("")),
        (CellValue::Empty, CellValue::Bool(b)) => Ok(false.cmp(b)),
        (CellValue::Bool(b), CellValue::Empty) => Ok(b.cmp(&false)),
        (CellValue::Text(a), CellValue::Text(b)) => Ok(a.to_lowercase().cmp(&b.to_lowercase())),
        (CellValue::Bool(a), CellValue::Bool(b)) => Ok(a.cmp(b)),
        _ if rank(l) == 0 && rank(r) == 0 => {
            let a = l.to_number().unwrap_or(0.0);
            let b = r.to_number().unwrap_or(0.0);
            Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
        _ => Ok(rank(l).cmp(&rank(r))),
    }
}

fn round_to(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    if digits >= 0 {
        (x * factor).round() / factor
    } else {
        (x / 10f64.powi(-digits)).round() * 10f64.powi(-digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_orders_types() {
        let n = CellValue::Number(5.0);
        let t = CellValue::text("abc");
        let b = CellValue::Bool(false);
        assert_eq!(compare(&n, &t), Ok(Ordering::Less));
        assert_eq!(compare(&t, &b), Ok(Ordering::Less));
        assert_eq!(compare(&CellValue::text("ABC"), &t), Ok(Ordering::Equal));
        assert_eq!(compare(&CellValue::Empty, &CellValue::Number(0.0)), Ok(Ordering::Equal));
        assert_eq!(
            compare(&CellValue::Error(ErrorKind::Na), &n),
            Err(ErrorKind::Na)
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(1.234, 2), 1.23);
        assert_eq!(round_to(1250.0, -2), 1300.0);
    }

    #[test]
    fn number_text_is_cached_per_context() {
        let mut ctx = EvalContext::new(NumberContext {
            decimal_separator: ',',
        });
        let a = ctx.number_to_text(1.5);
        let b = ctx.number_to_text(1.5);
        assert_eq!(&*a, "1,5");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
