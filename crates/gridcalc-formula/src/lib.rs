//! Compiled formulas for the gridcalc engine.
//!
//! The engine treats a formula as an opaque expression with a known set of
//! references. This crate supplies that carrier plus a small A1 parser and a
//! canonical renderer so documents can be driven with readable text.

pub mod ast;
pub mod parser;
pub mod render;

pub use ast::{
    BinaryOp, Expr, Formula, RefPoint, Reference, SheetScope, UnaryOp, is_dynamic_function,
};
pub use parser::{ParseContext, ParseError, SheetNames, parse_formula, parse_reference};
