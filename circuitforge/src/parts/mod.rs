//! Canonical part records and the deduplication/merge engine.
//!
//! A part's identity for merging is (componentId, mpn, manufacturer).
//! Selecting the same part twice never creates a second row; it bumps the
//! existing quantity by one.

pub mod normalize;

pub use normalize::normalize;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A finalized, canonical part. Price and quantity are always finite
/// canonical numbers; raw upstream shapes never reach this type except
/// through [`normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    /// Caller-assigned stable identifier of the placed component. Distinct
    /// from the mpn and never empty (the normalizer generates a fallback).
    pub component_id: String,
    pub mpn: String,
    pub manufacturer: String,
    pub description: String,
    /// Unit price, finite and >= 0.
    pub price: f64,
    /// Integer quantity, >= 1.
    pub quantity: u32,
    pub currency: String,
    pub package: String,
    pub interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
}

impl PartRecord {
    pub fn key(&self) -> PartKey {
        PartKey {
            component_id: self.component_id.clone(),
            mpn: self.mpn.clone(),
            manufacturer: self.manufacturer.clone(),
        }
    }

    /// Line total for BOM summaries.
    pub fn extended_price(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// Merge key for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartKey {
    pub component_id: String,
    pub mpn: String,
    pub manufacturer: String,
}

/// Result of [`PartList::upsert`]. A duplicate is informational, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    /// Merged into an existing row; carries the new total quantity.
    Merged { quantity: u32 },
}

impl MergeOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

/// Ordered list of canonical parts with merge-on-insert semantics.
#[derive(Debug, Clone, Default)]
pub struct PartList {
    items: Vec<PartRecord>,
}

impl PartList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge. Events are applied strictly sequentially, so two
    /// selections for the same key always converge against the latest list.
    pub fn upsert(&mut self, part: PartRecord) -> MergeOutcome {
        let key = part.key();
        if let Some(existing) = self.items.iter_mut().find(|p| p.key() == key) {
            existing.quantity += 1;
            debug!(
                component_id = %key.component_id,
                mpn = %key.mpn,
                quantity = existing.quantity,
                "duplicate selection merged"
            );
            MergeOutcome::Merged {
                quantity: existing.quantity,
            }
        } else {
            self.items.push(part);
            MergeOutcome::Added
        }
    }

    /// Remove a part by key. Returns the removed record so callers can
    /// detach node references.
    pub fn remove(&mut self, key: &PartKey) -> Option<PartRecord> {
        let idx = self.items.iter().position(|p| &p.key() == key)?;
        Some(self.items.remove(idx))
    }

    /// Replace the record under `key` with `updated`. Returns false when
    /// the key is absent. If the edit changes the key fields onto a key
    /// another row already holds, the rows merge (quantities summed) so
    /// the list never carries two rows with one key.
    pub fn replace(&mut self, key: &PartKey, updated: PartRecord) -> bool {
        let Some(idx) = self.items.iter().position(|p| &p.key() == key) else {
            return false;
        };
        let new_key = updated.key();
        let collision = self
            .items
            .iter()
            .position(|p| p.key() == new_key)
            .filter(|&other| other != idx);
        match collision {
            Some(other) => {
                self.items[other].quantity += updated.quantity;
                debug!(
                    component_id = %new_key.component_id,
                    mpn = %new_key.mpn,
                    quantity = self.items[other].quantity,
                    "edit collided with an existing row; merged"
                );
                self.items.remove(idx);
            }
            None => self.items[idx] = updated,
        }
        true
    }

    pub fn get(&self, key: &PartKey) -> Option<&PartRecord> {
        self.items.iter().find(|p| &p.key() == key)
    }

    /// Overwrite the whole list (history restore, design load).
    pub fn restore(&mut self, snapshot: &[PartRecord]) {
        self.items = snapshot.to_vec();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[PartRecord] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of extended prices across the list.
    pub fn total_cost(&self) -> f64 {
        self.items.iter().map(|p| p.extended_price()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(component_id: &str, mpn: &str, manufacturer: &str) -> PartRecord {
        PartRecord {
            component_id: component_id.into(),
            mpn: mpn.into(),
            manufacturer: manufacturer.into(),
            description: String::new(),
            price: 1.5,
            quantity: 1,
            currency: "USD".into(),
            package: "LQFP64".into(),
            interfaces: vec![],
            datasheet: None,
            lifecycle: None,
            availability: None,
        }
    }

    #[test]
    fn test_upsert_adds_then_merges() {
        let mut list = PartList::new();
        assert_eq!(list.upsert(part("U1", "STM32F405", "ST")), MergeOutcome::Added);
        assert_eq!(
            list.upsert(part("U1", "STM32F405", "ST")),
            MergeOutcome::Merged { quantity: 2 }
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list.items()[0].quantity, 2);
    }

    #[test]
    fn test_n_duplicates_converge_to_quantity_n() {
        let mut list = PartList::new();
        for _ in 0..7 {
            list.upsert(part("U1", "STM32F405", "ST"));
        }
        assert_eq!(list.len(), 1);
        assert_eq!(list.items()[0].quantity, 7);
    }

    #[test]
    fn test_key_requires_all_three_fields() {
        let mut list = PartList::new();
        list.upsert(part("U1", "STM32F405", "ST"));
        // Same mpn under a different component id is a distinct row.
        assert_eq!(list.upsert(part("U2", "STM32F405", "ST")), MergeOutcome::Added);
        // Same component id and mpn from a different manufacturer too.
        assert_eq!(
            list.upsert(part("U1", "STM32F405", "ST-clone")),
            MergeOutcome::Added
        );
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_remove_and_replace() {
        let mut list = PartList::new();
        list.upsert(part("U1", "STM32F405", "ST"));
        let key = list.items()[0].key();

        let mut updated = part("U1", "STM32F405", "ST");
        updated.price = 9.99;
        assert!(list.replace(&key, updated));
        assert_eq!(list.get(&key).unwrap().price, 9.99);

        assert!(list.remove(&key).is_some());
        assert!(list.remove(&key).is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_edit_onto_existing_key_merges_rows() {
        let mut list = PartList::new();
        list.upsert(part("U1", "A", "TI"));
        list.upsert(part("U1", "B", "TI"));
        let edited_key = list.items()[1].key();

        // Editing B's mpn to "A" lands on U1/A/TI, which already exists.
        let mut updated = part("U1", "B", "TI");
        updated.mpn = "A".into();
        assert!(list.replace(&edited_key, updated));

        assert_eq!(list.len(), 1, "no two rows may share a key");
        let merged = &list.items()[0];
        assert_eq!(merged.key(), part("U1", "A", "TI").key());
        assert_eq!(merged.quantity, 2);
        // The edited-away key is gone.
        assert!(list.get(&edited_key).is_none());
    }

    #[test]
    fn test_total_cost() {
        let mut list = PartList::new();
        let mut a = part("U1", "A", "X");
        a.price = 2.0;
        a.quantity = 3;
        let mut b = part("U2", "B", "X");
        b.price = 0.5;
        list.upsert(a);
        list.upsert(b);
        assert!((list.total_cost() - 6.5).abs() < f64::EPSILON);
    }
}
