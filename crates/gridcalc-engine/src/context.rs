//! Per-document shared context.
//!
//! One [`DocumentContext`] is created with each document and handed by
//! reference to every component that needs formatting, collation or string
//! interning. Nothing here is process-global; the only statics are the
//! immutable built-in sort lists.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use gridcalc_common::{SheetLimits, format_number};
use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/* ─────────────────────────── Shared strings ─────────────────────────── */

#[derive(Debug)]
struct SharedStr {
    text: Box<str>,
    folded: Box<str>,
}

/// An interned string together with its case-folded form.
///
/// Clones are cheap (one `Arc`), and two strings from the same pool compare
/// equal exactly when their text is equal.
#[derive(Clone)]
pub struct SharedString(Arc<SharedStr>);

impl SharedString {
    pub fn new(text: &str) -> Self {
        Self(Arc::new(SharedStr {
            text: text.into(),
            folded: text.to_lowercase().into(),
        }))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Lowercased text used for case-insensitive comparison.
    #[inline]
    pub fn folded(&self) -> &str {
        &self.0.folded
    }
}

impl fmt::Debug for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for SharedString {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.as_str() == other.as_str()
    }
}

impl Eq for SharedString {}

impl Hash for SharedString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Borrow<str> for SharedString {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// Interning pool for cell strings.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: FxHashSet<SharedString>,
}

impl StringPool {
    pub fn intern(&mut self, text: &str) -> SharedString {
        if let Some(existing) = self.strings.get(text) {
            return existing.clone();
        }
        let s = SharedString::new(text);
        self.strings.insert(s.clone());
        s
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Drop strings no cell refers to any more.
    pub fn purge_unused(&mut self) -> usize {
        let before = self.strings.len();
        self.strings.retain(|s| Arc::strong_count(&s.0) > 1);
        before - self.strings.len()
    }
}

/* ─────────────────────────── Number context ─────────────────────────── */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberContext {
    pub decimal_separator: char,
}

impl Default for NumberContext {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
        }
    }
}

impl NumberContext {
    /// General-format text for a number under this context.
    pub fn number_to_text(&self, n: f64) -> String {
        let s = format_number(n);
        if self.decimal_separator == '.' {
            s
        } else {
            s.replace('.', &self.decimal_separator.to_string())
        }
    }
}

/* ───────────────────────────── Sort lists ───────────────────────────── */

/// A custom ordering list (weekdays, months, user defined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserList {
    pub items: Vec<String>,
}

impl UserList {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn position(&self, text: &str, case_sensitive: bool) -> Option<usize> {
        if case_sensitive {
            self.items.iter().position(|i| i == text)
        } else {
            self.items
                .iter()
                .position(|i| i.to_lowercase() == text.to_lowercase())
        }
    }
}

static DEFAULT_USER_LISTS: Lazy<Vec<UserList>> = Lazy::new(|| {
    vec![
        UserList::new(["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"]),
        UserList::new([
            "Sunday",
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
        ]),
        UserList::new([
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ]),
        UserList::new([
            "January",
            "February",
            "March",
            "April",
            "May",
            "June",
            "July",
            "August",
            "September",
            "October",
            "November",
            "December",
        ]),
    ]
});

/* ─────────────────────────── DocumentContext ────────────────────────── */

#[derive(Debug)]
pub struct DocumentContext {
    pub limits: SheetLimits,
    pub null_date: NaiveDate,
    number: NumberContext,
    pub strings: StringPool,
    pub user_lists: Vec<UserList>,
    epoch: u64,
}

impl DocumentContext {
    pub fn new(limits: SheetLimits) -> Self {
        Self {
            limits,
            null_date: NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default(),
            number: NumberContext::default(),
            strings: StringPool::default(),
            user_lists: DEFAULT_USER_LISTS.clone(),
            epoch: 0,
        }
    }

    #[inline]
    pub fn number(&self) -> &NumberContext {
        &self.number
    }

    /// Replace the number context. Returns `true` when it actually changed,
    /// in which case the epoch advances and every formula must be recalculated.
    pub fn set_number(&mut self, number: NumberContext) -> bool {
        if self.number == number {
            return false;
        }
        self.number = number;
        self.epoch += 1;
        true
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn user_list(&self, index: usize) -> Option<&UserList> {
        self.user_lists.get(index)
    }

    pub fn date_to_serial(&self, date: NaiveDate) -> f64 {
        (date - self.null_date).num_days() as f64
    }

    pub fn serial_to_date(&self, serial: f64) -> Option<NaiveDate> {
        if !serial.is_finite() {
            return None;
        }
        self.null_date
            .checked_add_signed(Duration::try_days(serial.floor() as i64)?)
    }
}

impl Default for DocumentContext {
    fn default() -> Self {
        Self::new(SheetLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_interns_and_purges() {
        let mut pool = StringPool::default();
        let a = pool.intern("Apple");
        let b = pool.intern("Apple");
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(a.folded(), "apple");
        drop(pool.intern("transient"));
        assert_eq!(pool.purge_unused(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn number_context_change_bumps_epoch() {
        let mut ctx = DocumentContext::default();
        assert!(!ctx.set_number(NumberContext::default()));
        assert!(ctx.set_number(NumberContext {
            decimal_separator: ','
        }));
        assert_eq!(ctx.epoch(), 1);
        assert_eq!(ctx.number().number_to_text(2.5), "2,5");
    }

    #[test]
    fn serial_dates_use_null_date() {
        let ctx = DocumentContext::default();
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let serial = ctx.date_to_serial(d);
        assert_eq!(serial, 45292.0);
        assert_eq!(ctx.serial_to_date(serial), Some(d));
    }

    #[test]
    fn default_lists_include_months() {
        let ctx = DocumentContext::default();
        let months = ctx.user_list(2).unwrap();
        assert_eq!(months.position("mar", false), Some(2));
        assert_eq!(months.position("mar", true), None);
    }
}
