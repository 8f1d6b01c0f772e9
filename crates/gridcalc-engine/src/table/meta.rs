//! Sheet-level metadata that travels with a table but does not affect cell
//! storage: names, protection, scenarios, named ranges, print setup and
//! conditional formats. Ranges held here are rewritten by the
//! reference-update pass like any formula operand.

use gridcalc_common::{RangeAddr, SheetError, SheetResult};
use serde::{Deserialize, Serialize};

use crate::flags::ProtectionAllow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SheetProtection {
    /// Hash of the password; `None` protects without a password.
    pub password_hash: Option<u64>,
    pub allow: ProtectionAllow,
}

impl SheetProtection {
    pub fn new(password: Option<&str>, allow: ProtectionAllow) -> Self {
        Self {
            password_hash: password.map(password_hash),
            allow,
        }
    }

    pub fn verify(&self, password: Option<&str>) -> bool {
        match (self.password_hash, password) {
            (None, _) => true,
            (Some(h), Some(p)) => password_hash(p) == h,
            (Some(_), None) => false,
        }
    }

    pub fn allows(&self, action: ProtectionAllow) -> bool {
        self.allow.contains(action)
    }
}

/// FNV-1a; protection hashes only need to be stable, not secret.
fn password_hash(password: &str) -> u64 {
    password.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub comment: String,
    /// Display color as `0xRRGGBB`.
    pub color: u32,
    pub show_frame: bool,
    pub protected: bool,
    pub ranges: Vec<RangeAddr>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRange {
    pub name: String,
    pub range: RangeAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalFormat {
    pub id: u32,
    pub ranges: Vec<RangeAddr>,
    /// Opaque rule payload owned by the formatting layer.
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrintSetup {
    pub print_ranges: Vec<RangeAddr>,
    /// Whole-sheet printing when no print range is set.
    pub print_entire_sheet: bool,
    pub repeat_rows: Option<(u32, u32)>,
    pub repeat_cols: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetMeta {
    pub name: String,
    pub code_name: Option<String>,
    pub visibility: Visibility,
    /// Tab color as `0xRRGGBB`.
    pub tab_color: Option<u32>,
    pub right_to_left: bool,
    pub protection: Option<SheetProtection>,
    pub scenario: Option<Scenario>,
    pub named_ranges: Vec<NamedRange>,
    pub print: PrintSetup,
    pub conditional_formats: Vec<ConditionalFormat>,
}

impl SheetMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code_name: None,
            visibility: Visibility::Visible,
            tab_color: None,
            right_to_left: false,
            protection: None,
            scenario: None,
            named_ranges: Vec::new(),
            print: PrintSetup {
                print_entire_sheet: true,
                ..PrintSetup::default()
            },
            conditional_formats: Vec::new(),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protection.is_some()
    }

    /// `Ok` when `action` is permitted on this sheet.
    pub fn check_allowed(&self, action: ProtectionAllow) -> SheetResult<()> {
        match &self.protection {
            Some(p) if !p.allows(action) => Err(SheetError::ProtectedSheet(self.name.clone())),
            _ => Ok(()),
        }
    }

    pub fn named_range(&self, name: &str) -> Option<&NamedRange> {
        self.named_ranges
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }

    pub fn set_named_range(&mut self, name: impl Into<String>, range: RangeAddr) {
        let name = name.into();
        match self
            .named_ranges
            .iter_mut()
            .find(|n| n.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.range = range,
            None => self.named_ranges.push(NamedRange { name, range }),
        }
    }

    pub fn remove_named_range(&mut self, name: &str) -> bool {
        let before = self.named_ranges.len();
        self.named_ranges
            .retain(|n| !n.name.eq_ignore_ascii_case(name));
        before != self.named_ranges.len()
    }

    pub fn add_conditional_format(&mut self, ranges: Vec<RangeAddr>, rule: impl Into<String>) -> u32 {
        let id = self
            .conditional_formats
            .iter()
            .map(|c| c.id + 1)
            .max()
            .unwrap_or(1);
        self.conditional_formats.push(ConditionalFormat {
            id,
            ranges,
            rule: rule.into(),
        });
        id
    }

    pub fn remove_conditional_format(&mut self, id: u32) -> bool {
        let before = self.conditional_formats.len();
        self.conditional_formats.retain(|c| c.id != id);
        before != self.conditional_formats.len()
    }

    /// Rewrite every range held in metadata through `f`. Ranges mapped to
    /// `None` are dropped; a named range whose target vanished is removed.
    pub(crate) fn map_ranges(&mut self, mut f: impl FnMut(RangeAddr) -> Option<RangeAddr>) {
        let mut map_vec = |ranges: &mut Vec<RangeAddr>| {
            *ranges = ranges.iter().filter_map(|r| f(*r)).collect();
        };
        map_vec(&mut self.print.print_ranges);
        if let Some(s) = &mut self.scenario {
            map_vec(&mut s.ranges);
        }
        for cf in &mut self.conditional_formats {
            map_vec(&mut cf.ranges);
        }
        self.conditional_formats.retain(|c| !c.ranges.is_empty());
        self.named_ranges = std::mem::take(&mut self.named_ranges)
            .into_iter()
            .filter_map(|n| {
                f(n.range).map(|range| NamedRange {
                    name: n.name,
                    range,
                })
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_checks_password_and_actions() {
        let p = SheetProtection::new(Some("secret"), ProtectionAllow::SORT);
        assert!(p.verify(Some("secret")));
        assert!(!p.verify(Some("guess")));
        assert!(!p.verify(None));

        let mut meta = SheetMeta::new("Data");
        meta.protection = Some(p);
        assert!(meta.check_allowed(ProtectionAllow::SORT).is_ok());
        assert_eq!(
            meta.check_allowed(ProtectionAllow::INSERT_ROWS),
            Err(SheetError::ProtectedSheet("Data".into()))
        );
    }

    #[test]
    fn map_ranges_drops_vanished_targets() {
        let mut meta = SheetMeta::new("S");
        meta.set_named_range("Keep", RangeAddr::new(0, 0, 0, 0, 3));
        meta.set_named_range("Gone", RangeAddr::new(0, 5, 0, 5, 0));
        let cf = meta.add_conditional_format(vec![RangeAddr::new(0, 5, 0, 5, 9)], "x>1");
        meta.map_ranges(|r| (r.col1 != 5).then_some(r));
        assert!(meta.named_range("keep").is_some());
        assert!(meta.named_range("Gone").is_none());
        assert!(!meta.remove_conditional_format(cf));
    }
}
