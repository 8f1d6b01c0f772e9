//! Row filtering.
//!
//! A [`QueryParam`] is a list of column predicates joined by `And`/`Or`
//! (`And` binds tighter). Running a query marks each non-matching data row
//! as filtered and hidden; the geometry layer then skips those rows in
//! visible-row iteration.

use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashSet;

use gridcalc_common::{CellValue, RangeAddr, SheetError, SheetResult, SheetTab, format_number};

use crate::document::Document;
use crate::flags::{MergeFlags, ProtectionAllow};
use crate::sort::{SortKey, compare_for_sort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Contains,
    NotContains,
    BeginsWith,
    EndsWith,
    Empty,
    NotEmpty,
    /// The `n` largest numbers of the column.
    TopN,
    BottomN,
    InList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connector {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Plain,
    /// `*` and `?` wildcards, `~` escapes the next character.
    Wildcard,
    Regex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    None,
    Number(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    pub col: u32,
    pub op: QueryOp,
    pub value: QueryValue,
    /// How this entry joins the ones before it; ignored on the first.
    pub connector: Connector,
}

impl QueryEntry {
    pub fn new(col: u32, op: QueryOp, value: QueryValue) -> Self {
        Self {
            col,
            op,
            value,
            connector: Connector::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.connector = Connector::Or;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    pub range: RangeAddr,
    pub has_header: bool,
    pub entries: Vec<QueryEntry>,
    pub case_sensitive: bool,
    pub mode: MatchMode,
}

impl QueryParam {
    pub fn new(range: RangeAddr) -> Self {
        Self {
            range,
            has_header: true,
            entries: Vec::new(),
            case_sensitive: false,
            mode: MatchMode::Plain,
        }
    }

    pub fn with_entry(mut self, entry: QueryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn first_data_row(&self) -> u32 {
        self.range.row1 + u32::from(self.has_header)
    }
}

/// Distinct values of a column, as offered in an auto-filter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterEntries {
    pub values: Vec<CellValue>,
    pub has_empty: bool,
}

/* ───────────────────────────── Preparation ───────────────────────────── */

/// Translate a wildcard pattern into an anchored-free regex body.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '~' => match chars.next() {
                Some(n) => out.push_str(&regex::escape(&n.to_string())),
                None => out.push_str(&regex::escape("~")),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

struct PreparedEntry<'p> {
    entry: &'p QueryEntry,
    /// Whole-cell matcher and substring matcher for pattern modes.
    full: Option<Regex>,
    partial: Option<Regex>,
    /// Cut-off for TopN/BottomN.
    threshold: Option<f64>,
    list: Vec<String>,
}

struct PreparedQuery<'p> {
    param: &'p QueryParam,
    entries: Vec<PreparedEntry<'p>>,
}

impl Document {
    fn prepare_query<'p>(&self, param: &'p QueryParam) -> SheetResult<PreparedQuery<'p>> {
        let mut entries = Vec::with_capacity(param.entries.len());
        for entry in &param.entries {
            if entry.col < param.range.col1 || entry.col > param.range.col2 {
                return Err(SheetError::IndexOutOfRange {
                    what: "query column",
                    index: entry.col as u64,
                    max: param.range.col2 as u64,
                });
            }
            let (full, partial) = match (&entry.value, param.mode) {
                (QueryValue::Text(t), MatchMode::Wildcard | MatchMode::Regex) => {
                    let body = if param.mode == MatchMode::Wildcard {
                        wildcard_to_regex(t)
                    } else {
                        t.clone()
                    };
                    let build = |src: String| {
                        RegexBuilder::new(&src)
                            .case_insensitive(!param.case_sensitive)
                            .build()
                            .map_err(|e| SheetError::Parse(e.to_string()))
                    };
                    (
                        Some(build(format!("^(?:{body})$"))?),
                        Some(build(body)?),
                    )
                }
                _ => (None, None),
            };
            let threshold = match (entry.op, &entry.value) {
                (QueryOp::TopN | QueryOp::BottomN, QueryValue::Number(n)) => {
                    self.top_threshold(param, entry.col, *n, entry.op == QueryOp::TopN)?
                }
                _ => None,
            };
            let list = match &entry.value {
                QueryValue::List(items) => items.iter().map(|s| fold(s, param.case_sensitive)).collect(),
                _ => Vec::new(),
            };
            entries.push(PreparedEntry {
                entry,
                full,
                partial,
                threshold,
                list,
            });
        }
        Ok(PreparedQuery { param, entries })
    }

    fn top_threshold(&self, param: &QueryParam, col: u32, n: f64, top: bool) -> SheetResult<Option<f64>> {
        let table = self.sheet(param.range.tab)?;
        let formulas = self.formulas();
        let mut numbers: Vec<f64> = (param.first_data_row()..=param.range.row2)
            .filter_map(|row| match table.get_cell(col, row, formulas).value() {
                CellValue::Number(x) => Some(x),
                _ => None,
            })
            .collect();
        let n = n.max(0.0) as usize;
        if n == 0 || numbers.is_empty() {
            return Ok(None);
        }
        numbers.sort_by(|a, b| a.total_cmp(b));
        if top {
            numbers.reverse();
        }
        Ok(Some(numbers[n.min(numbers.len()) - 1]))
    }
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

fn cell_text(v: &CellValue) -> String {
    match v {
        CellValue::Number(n) => format_number(*n),
        other => other.to_string(),
    }
}

impl PreparedEntry<'_> {
    fn matches(&self, value: &CellValue, case_sensitive: bool) -> bool {
        let op = self.entry.op;
        match op {
            QueryOp::Empty => return value.is_empty(),
            QueryOp::NotEmpty => return !value.is_empty(),
            QueryOp::TopN => {
                return matches!((value, self.threshold), (CellValue::Number(x), Some(t)) if *x >= t);
            }
            QueryOp::BottomN => {
                return matches!((value, self.threshold), (CellValue::Number(x), Some(t)) if *x <= t);
            }
            QueryOp::InList => return self.list.contains(&fold(&cell_text(value), case_sensitive)),
            _ => {}
        }
        match &self.entry.value {
            QueryValue::Number(q) => match value {
                CellValue::Number(x) => compare_op(op, x.partial_cmp(q)),
                _ => op == QueryOp::NotEqual,
            },
            QueryValue::Text(q) => {
                if value.is_error() {
                    return op == QueryOp::NotEqual || op == QueryOp::NotContains;
                }
                let text = cell_text(value);
                if let (Some(full), Some(partial)) = (&self.full, &self.partial) {
                    return match op {
                        QueryOp::Equal => full.is_match(&text),
                        QueryOp::NotEqual => !full.is_match(&text),
                        QueryOp::Contains => partial.is_match(&text),
                        QueryOp::NotContains => !partial.is_match(&text),
                        QueryOp::BeginsWith => partial.find(&text).is_some_and(|m| m.start() == 0),
                        QueryOp::EndsWith => partial
                            .find_iter(&text)
                            .any(|m| m.end() == text.len()),
                        _ => compare_op(op, Some(fold(&text, case_sensitive).cmp(&fold(q, case_sensitive)))),
                    };
                }
                let (text, q) = (fold(&text, case_sensitive), fold(q, case_sensitive));
                match op {
                    QueryOp::Contains => text.contains(&q),
                    QueryOp::NotContains => !text.contains(&q),
                    QueryOp::BeginsWith => text.starts_with(&q),
                    QueryOp::EndsWith => text.ends_with(&q),
                    _ => compare_op(op, Some(text.cmp(&q))),
                }
            }
            QueryValue::None | QueryValue::List(_) => false,
        }
    }
}

fn compare_op(op: QueryOp, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    let Some(ord) = ord else {
        return op == QueryOp::NotEqual;
    };
    match op {
        QueryOp::Equal => ord == Equal,
        QueryOp::NotEqual => ord != Equal,
        QueryOp::Less => ord == Less,
        QueryOp::Greater => ord == Greater,
        QueryOp::LessEqual => ord != Greater,
        QueryOp::GreaterEqual => ord != Less,
        _ => false,
    }
}

/* ─────────────────────────────── Queries ─────────────────────────────── */

impl Document {
    fn row_matches(&self, query: &PreparedQuery<'_>, row: u32) -> SheetResult<bool> {
        let table = self.sheet(query.param.range.tab)?;
        let formulas = self.formulas();
        // Sum of products: Or starts a new term, And extends the current one.
        let mut any = false;
        let mut term = true;
        for (i, prepared) in query.entries.iter().enumerate() {
            if i > 0 && prepared.entry.connector == Connector::Or {
                any |= term;
                term = true;
            }
            if term {
                let value = table.get_cell(prepared.entry.col, row, formulas).value();
                term = prepared.matches(&value, query.param.case_sensitive);
            }
        }
        Ok(any || term)
    }

    /// Does `row` pass `param`? A query without entries passes every row.
    pub fn valid_query(&self, row: u32, param: &QueryParam) -> SheetResult<bool> {
        let prepared = self.prepare_query(param)?;
        self.row_matches(&prepared, row)
    }

    /// Filter the data rows of `param.range`. Returns how many rows remain
    /// visible.
    pub fn query(&mut self, param: QueryParam) -> SheetResult<u32> {
        let tab = param.range.tab;
        self.config.limits.check_range(&param.range)?;
        self.sheet(tab)?
            .meta
            .check_allowed(ProtectionAllow::AUTO_FILTER)?;
        let first = param.first_data_row();
        let mut decisions: Vec<(u32, bool)> = Vec::new();
        if first <= param.range.row2 {
            let prepared = self.prepare_query(&param)?;
            for row in first..=param.range.row2 {
                decisions.push((row, self.row_matches(&prepared, row)?));
            }
        }
        self.remove_filter(tab)?;

        let table = &mut self.tables[tab as usize];
        let mut visible = 0;
        let mut spans: Vec<(u32, u32, bool)> = Vec::new();
        for (row, keep) in decisions {
            visible += u32::from(keep);
            match spans.last_mut() {
                Some((_, end, k)) if *k == keep && *end + 1 == row => *end = row,
                _ => spans.push((row, row, keep)),
            }
        }
        for (r1, r2, keep) in spans {
            table.set_row_filtered(r1, r2, !keep)?;
            table.set_row_hidden(r1, r2, !keep)?;
        }
        if param.has_header {
            for col in param.range.col1..=param.range.col2 {
                table.column_mut(col)?.apply_merge_flags(
                    param.range.row1,
                    param.range.row1,
                    |f| f | MergeFlags::AUTO_FILTER,
                )?;
            }
        }
        tracing::debug!(tab, range = %param.range, visible, "query applied");
        table.query_param = Some(param);
        Ok(visible)
    }

    /// Show every row hidden by the sheet's last query and drop it.
    pub fn remove_filter(&mut self, tab: SheetTab) -> SheetResult<bool> {
        self.sheet(tab)?
            .meta
            .check_allowed(ProtectionAllow::AUTO_FILTER)?;
        let table = &mut self.tables[tab as usize];
        let Some(param) = table.query_param.take() else {
            return Ok(false);
        };
        let first = param.first_data_row();
        if first <= param.range.row2 {
            table.set_row_filtered(first, param.range.row2, false)?;
            table.set_row_hidden(first, param.range.row2, false)?;
        }
        if param.has_header {
            for col in param.range.col1..=param.range.col2 {
                if let Some(column) = table.allocated_column_mut(col) {
                    column.apply_merge_flags(param.range.row1, param.range.row1, |f| {
                        f - MergeFlags::AUTO_FILTER
                    })?;
                }
            }
        }
        Ok(true)
    }

    pub fn query_param(&self, tab: SheetTab) -> Option<&QueryParam> {
        self.tables.get(tab as usize)?.query_param.as_ref()
    }

    /// Distinct values in `col` over `row1..=row2`, sorted the way an
    /// ascending sort would order them. Text is deduplicated
    /// case-insensitively.
    pub fn filter_entries(&self, tab: SheetTab, col: u32, row1: u32, row2: u32) -> SheetResult<FilterEntries> {
        let table = self.sheet(tab)?;
        self.config.limits.check_col(col)?;
        self.config.limits.check_row(row2)?;
        let formulas = self.formulas();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut out = FilterEntries::default();
        for row in row1..=row2.min(table.last_data_row(col, col).unwrap_or(0)) {
            let value = table.get_cell(col, row, formulas).value();
            if value.is_empty() {
                out.has_empty = true;
                continue;
            }
            let key = format!("{}:{}", value_tag(&value), cell_text(&value).to_lowercase());
            if seen.insert(key) {
                out.values.push(value);
            }
        }
        if table.last_data_row(col, col).is_none_or(|last| last < row2) {
            out.has_empty = true;
        }
        let key = SortKey::ascending(col);
        out.values
            .sort_by(|a, b| compare_for_sort(a, b, &key, &self.ctx));
        Ok(out)
    }
}

fn value_tag(v: &CellValue) -> u8 {
    match v {
        CellValue::Number(_) => 0,
        CellValue::Text(_) => 1,
        CellValue::Bool(_) => 2,
        CellValue::Error(_) => 3,
        CellValue::Empty => 4,
    }
}
