use std::collections::VecDeque;

use crate::record::Record;

pub const SELECTION_CAPACITY: usize = 2;

/// Ids of the most recently selected rows, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: VecDeque<i64>,
}

/// Difference of one numeric field between the two selected rows, computed as
/// `first - second` in selection order.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub field: &'static str,
    pub first_id: i64,
    pub second_id: i64,
    pub first: f64,
    pub second: f64,
    pub delta: f64,
}

impl SelectionSet {
    pub fn ids(&self) -> Vec<i64> {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// Deselects `id` if selected, otherwise selects it and evicts the oldest
    /// entry once over capacity. Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: i64) -> bool {
        if let Some(pos) = self.ids.iter().position(|x| *x == id) {
            self.ids.remove(pos);
            return false;
        }
        self.ids.push_back(id);
        while self.ids.len() > SELECTION_CAPACITY {
            self.ids.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drops ids that are no longer in `records`.
    pub fn retain_present(&mut self, records: &[Record]) {
        self.ids.retain(|id| records.iter().any(|r| r.id == *id));
    }

    pub fn comparison(&self, records: &[Record], field: &'static str) -> Option<Comparison> {
        if self.ids.len() != SELECTION_CAPACITY {
            return None;
        }
        let lookup = |id: i64| records.iter().find(|r| r.id == id);
        let first_id = self.ids[0];
        let second_id = self.ids[1];
        let first = lookup(first_id)?.number(field).unwrap_or(0.0);
        let second = lookup(second_id)?.number(field).unwrap_or(0.0);
        Some(Comparison {
            field,
            first_id,
            second_id,
            first,
            second,
            delta: first - second,
        })
    }
}
