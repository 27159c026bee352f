//! Bounded undo/redo history of the part list.
//!
//! The stack is seeded with the initial state so that undoing every save
//! lands back on the pre-save list. Each undoable user action saves exactly
//! once; batched operations count as a single entry.

use chrono::{DateTime, Utc};

use crate::parts::PartRecord;

/// Maximum snapshots retained; the oldest are dropped beyond this.
pub const HISTORY_LIMIT: usize = 50;

/// One deep-copied part-list snapshot.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub parts: Vec<PartRecord>,
    pub created_at: DateTime<Utc>,
}

impl HistorySnapshot {
    fn capture(parts: &[PartRecord]) -> Self {
        Self {
            parts: parts.to_vec(),
            created_at: Utc::now(),
        }
    }
}

/// Bounded snapshot stack with a cursor. The cursor always stays within
/// `[0, len - 1]`; redo is only valid while it trails the newest entry.
#[derive(Debug)]
pub struct HistoryStack {
    snapshots: Vec<HistorySnapshot>,
    cursor: usize,
}

impl HistoryStack {
    /// Seed with the initial part list (usually empty).
    pub fn new(initial: &[PartRecord]) -> Self {
        Self {
            snapshots: vec![HistorySnapshot::capture(initial)],
            cursor: 0,
        }
    }

    /// Truncate any redo tail, push a deep copy, advance the cursor, and
    /// cap the stack at [`HISTORY_LIMIT`] by dropping the oldest entries.
    pub fn save(&mut self, parts: &[PartRecord]) {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(HistorySnapshot::capture(parts));
        if self.snapshots.len() > HISTORY_LIMIT {
            let excess = self.snapshots.len() - HISTORY_LIMIT;
            self.snapshots.drain(..excess);
        }
        self.cursor = self.snapshots.len() - 1;
    }

    /// Step back one snapshot. No-op at the oldest entry.
    pub fn undo(&mut self) -> Option<&[PartRecord]> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(&self.snapshots[self.cursor].parts)
    }

    /// Step forward one snapshot. No-op at the newest entry.
    pub fn redo(&mut self) -> Option<&[PartRecord]> {
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        Some(&self.snapshots[self.cursor].parts)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(mpn: &str, quantity: u32) -> PartRecord {
        PartRecord {
            component_id: "U1".into(),
            mpn: mpn.into(),
            manufacturer: "ST".into(),
            description: String::new(),
            price: 1.0,
            quantity,
            currency: "USD".into(),
            package: String::new(),
            interfaces: vec![],
            datasheet: None,
            lifecycle: None,
            availability: None,
        }
    }

    #[test]
    fn test_n_undos_restore_initial_state() {
        let mut history = HistoryStack::new(&[]);
        let states: Vec<Vec<PartRecord>> = (1..=4).map(|i| vec![part("P", i)]).collect();
        for state in &states {
            history.save(state);
        }

        for expected in states.iter().rev().skip(1) {
            assert_eq!(history.undo().unwrap(), expected.as_slice());
        }
        // The final undo lands on the seeded (pre-save) snapshot.
        assert_eq!(history.undo().unwrap(), &[] as &[PartRecord]);
        assert!(history.undo().is_none(), "no-op at cursor 0");
    }

    #[test]
    fn test_redo_restores_pre_undo_state() {
        let mut history = HistoryStack::new(&[]);
        history.save(&[part("A", 1)]);
        history.save(&[part("A", 2)]);

        assert_eq!(history.undo().unwrap()[0].quantity, 1);
        assert_eq!(history.redo().unwrap()[0].quantity, 2);
        assert!(history.redo().is_none(), "no-op at the newest entry");
    }

    #[test]
    fn test_save_truncates_redo_tail() {
        let mut history = HistoryStack::new(&[]);
        history.save(&[part("A", 1)]);
        history.save(&[part("A", 2)]);
        history.undo();

        history.save(&[part("B", 1)]);
        // The quantity-2 snapshot is gone.
        assert!(history.redo().is_none());
        assert_eq!(history.undo().unwrap()[0].mpn, "A");
    }

    #[test]
    fn test_sixty_saves_keep_last_fifty_in_order() {
        let mut history = HistoryStack::new(&[]);
        for i in 1..=60u32 {
            history.save(&[part("P", i)]);
        }
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.cursor(), HISTORY_LIMIT - 1);

        // Walk back through the retained snapshots: pushes 60 down to 11.
        let mut expected = 59u32;
        while let Some(parts) = history.undo() {
            assert_eq!(parts[0].quantity, expected);
            expected -= 1;
        }
        assert_eq!(expected, 10, "oldest retained push is number 11");
    }

    #[test]
    fn test_cursor_always_in_bounds() {
        let mut history = HistoryStack::new(&[]);
        for i in 0..5u32 {
            history.save(&[part("P", i + 1)]);
            assert!(history.cursor() < history.len());
        }
        while history.undo().is_some() {
            assert!(history.cursor() < history.len());
        }
        while history.redo().is_some() {
            assert!(history.cursor() < history.len());
        }
    }
}
