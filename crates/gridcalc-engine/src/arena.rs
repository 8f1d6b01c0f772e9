//! Generational arena holding every formula cell of a document.
//!
//! Columns store a [`FormulaId`] in place of the formula, and broadcasters
//! hold the same ids as listeners. An id stays valid until its cell is
//! removed; after that the slot's generation moves on and lookups through
//! the stale id return `None` instead of reaching a recycled cell.

use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, RangeAddr};
use gridcalc_formula::Formula;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormulaId {
    index: u32,
    generation: u32,
}

impl FormulaId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

/// A formula cell: compiled expression, cached result and dirty state.
#[derive(Debug, Clone)]
pub struct FormulaCell {
    pub pos: CellAddr,
    pub formula: Arc<Formula>,
    pub result: CellValue,
    pub dirty: bool,
    /// Areas read through dynamic references during the last evaluation.
    pub dynamic_deps: SmallVec<[RangeAddr; 2]>,
}

impl FormulaCell {
    pub fn new(pos: CellAddr, formula: Arc<Formula>) -> Self {
        Self {
            pos,
            formula,
            result: CellValue::Empty,
            dirty: true,
            dynamic_deps: SmallVec::new(),
        }
    }

    /// Every area this cell currently listens to.
    pub fn listen_ranges(&self) -> SmallVec<[RangeAddr; 4]> {
        let mut ranges = self.formula.dependency_ranges();
        for r in &self.dynamic_deps {
            if !ranges.contains(r) {
                ranges.push(*r);
            }
        }
        ranges
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    cell: Option<FormulaCell>,
}

#[derive(Debug, Clone, Default)]
pub struct FormulaArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl FormulaArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: FormulaCell) -> FormulaId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.cell = Some(cell);
            return FormulaId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            cell: Some(cell),
        });
        FormulaId {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, id: FormulaId) -> Option<FormulaCell> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let cell = slot.cell.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(cell)
    }

    #[inline]
    pub fn get(&self, id: FormulaId) -> Option<&FormulaCell> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.cell.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: FormulaId) -> Option<&mut FormulaCell> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.cell.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: FormulaId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormulaId, &FormulaCell)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.cell.as_ref().map(|c| {
                (
                    FormulaId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    c,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FormulaId, &mut FormulaCell)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.cell.as_mut().map(move |c| {
                (
                    FormulaId {
                        index: i as u32,
                        generation,
                    },
                    c,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<FormulaId> {
        self.iter().map(|(id, _)| id).collect()
    }
}
