//! The dynamic table.
//!
//! An insertion-ordered, capacity-bounded FIFO of field lines. Entries are
//! addressed by absolute index: the first entry ever inserted has absolute
//! index 0 and `insert_count` is the absolute index the next insertion will
//! take. Indices are never reused; eviction is strictly oldest-first.
//!
//! Encoder and decoder each own their own table; the two are synchronized
//! only by encoder-stream instructions. The encoder-side extras — exact and
//! name lookups, reference pins, the known received count — are inert on the
//! decoder side.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::error::{Error, Result};
use crate::field::HeaderField;

struct Entry {
    field: HeaderField,
    index: u64,
}

pub struct DynamicTable {
    /// Live entries, oldest first.
    entries: VecDeque<Entry>,
    /// Current byte budget, set by the Set Dynamic Table Capacity instruction.
    capacity: usize,
    /// Negotiated ceiling the capacity may never exceed.
    max_capacity: usize,
    used: usize,
    insert_count: u64,
    /// Highest insert count the peer decoder has confirmed receiving.
    known_received_count: u64,
    /// Reference counts for entries referenced by unacknowledged sections.
    pins: HashMap<u64, usize>,
}

impl DynamicTable {
    /// Creates a table with zero current capacity. Capacity only grows via
    /// `set_capacity`, mirroring the wire protocol where no entries exist
    /// until a Set Dynamic Table Capacity instruction arrives.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: 0,
            max_capacity,
            used: 0,
            insert_count: 0,
            known_received_count: 0,
            pins: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn used_size(&self) -> usize {
        self.used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert_count(&self) -> u64 {
        self.insert_count
    }

    /// Maximum entry count the table could ever hold, used by the header
    /// block prefix's insert-count wrap arithmetic.
    pub fn max_entries(&self) -> u64 {
        (self.max_capacity / 32) as u64
    }

    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    /// Records that the peer has confirmed insertions up to `count`.
    pub fn update_known_received(&mut self, count: u64) -> Result<()> {
        if count > self.insert_count {
            return Err(Error::DecoderInstruction(
                "acknowledged insert count exceeds insertions",
            ));
        }
        if count > self.known_received_count {
            self.known_received_count = count;
        }
        Ok(())
    }

    /// Raises the ceiling along with the current capacity. Encoder side only,
    /// from `configure`.
    pub fn set_max_capacity(&mut self, max_capacity: usize) {
        self.max_capacity = max_capacity;
    }

    /// Changes the byte budget, evicting oldest entries until the remainder
    /// fits. Fails if the budget exceeds the negotiated ceiling or if an
    /// entry that must go is pinned by an unacknowledged section; on failure
    /// the table is untouched.
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity > self.max_capacity {
            return Err(Error::EncoderInstruction("capacity exceeds negotiated maximum"));
        }
        if let Some(index) = self.blocking_pin(self.used.saturating_sub(new_capacity)) {
            return Err(Error::CapacityReductionBlocked { index });
        }
        self.capacity = new_capacity;
        self.evict_to(new_capacity);
        trace!(capacity = new_capacity, used = self.used, "table capacity set");
        Ok(())
    }

    /// Appends a new entry, evicting from the front to make room. On
    /// failure the table is untouched.
    pub fn insert(&mut self, field: HeaderField) -> Result<u64> {
        let size = field.size();
        if size > self.capacity {
            return Err(Error::EntryTooLarge {
                size,
                capacity: self.capacity,
            });
        }
        let needed = (self.used + size).saturating_sub(self.capacity);
        if let Some(index) = self.blocking_pin(needed) {
            return Err(Error::CapacityReductionBlocked { index });
        }

        self.evict_to(self.capacity - size);

        let index = self.insert_count;
        trace!(index, size, "table insert");
        self.entries.push_back(Entry { field, index });
        self.used += size;
        self.insert_count += 1;
        Ok(index)
    }

    /// Re-inserts a copy of an existing entry, refreshing its recency.
    pub fn duplicate(&mut self, index: u64) -> Result<u64> {
        let field = self.get(index)?.clone();
        self.insert(field)
    }

    /// Entry at an absolute index; `UnknownIndex` if evicted or never
    /// inserted.
    pub fn get(&self, index: u64) -> Result<&HeaderField> {
        let front = self.entries.front().ok_or(Error::UnknownIndex(index))?.index;
        if index < front || index >= self.insert_count {
            return Err(Error::UnknownIndex(index));
        }
        // Indices are dense, so the entry sits at a fixed offset from the
        // oldest one.
        Ok(&self.entries[(index - front) as usize].field)
    }

    /// Entry addressed relative to the current insert count, as used by
    /// encoder-stream instructions: relative 0 is the newest entry.
    pub fn get_relative(&self, relative: u64) -> Result<&HeaderField> {
        let index = self
            .insert_count
            .checked_sub(relative + 1)
            .ok_or(Error::UnknownIndex(relative))?;
        self.get(index)
    }

    /// Newest live entry matching name and value exactly.
    pub fn find_exact(&self, name: &[u8], value: &[u8]) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.field.name == name && e.field.value == value)
            .map(|e| e.index)
    }

    /// Newest live entry with this name.
    pub fn find_name(&self, name: &[u8]) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.field.name == name)
            .map(|e| e.index)
    }

    /// Pins an entry against eviction while a section referencing it is
    /// unacknowledged.
    pub fn pin(&mut self, index: u64) {
        *self.pins.entry(index).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, index: u64) {
        if let Some(count) = self.pins.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&index);
            }
        }
    }

    fn is_pinned(&self, index: u64) -> bool {
        self.pins.contains_key(&index)
    }

    /// True if the oldest unpinned entries can free `needed` bytes.
    pub fn can_free(&self, needed: usize) -> bool {
        let mut freed = 0;
        for entry in &self.entries {
            if freed >= needed {
                break;
            }
            if self.is_pinned(entry.index) {
                return false;
            }
            freed += entry.field.size();
        }
        freed >= needed
    }

    /// True if the entry sits in the draining region: the oldest entries of
    /// a near-full table, which the encoder must stop referencing because
    /// they are next in line for eviction. Covers the oldest entries whose
    /// combined size exceeds the amount by which usage surpasses three
    /// quarters of capacity.
    pub fn is_draining(&self, index: u64) -> bool {
        let budget = self.used.saturating_sub(self.capacity - self.capacity / 4);
        if budget == 0 {
            return false;
        }
        let mut cumulative = 0;
        for entry in &self.entries {
            cumulative += entry.field.size();
            if entry.index == index {
                return cumulative <= budget;
            }
            if cumulative > budget {
                return false;
            }
        }
        false
    }

    /// Returns the pinned entry that prevents freeing `needed` bytes from
    /// the front, if any.
    fn blocking_pin(&self, needed: usize) -> Option<u64> {
        let mut freed = 0;
        for entry in &self.entries {
            if freed >= needed {
                break;
            }
            if self.is_pinned(entry.index) {
                return Some(entry.index);
            }
            freed += entry.field.size();
        }
        None
    }

    fn evict_to(&mut self, budget: usize) {
        while self.used > budget {
            let front = match self.entries.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            trace!(index = front.index, "table evict");
            self.used -= front.field.size();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> DynamicTable {
        let mut t = DynamicTable::new(capacity);
        t.set_capacity(capacity).unwrap();
        t
    }

    #[test]
    fn insert_assigns_dense_absolute_indices() {
        let mut t = table(1000);
        assert_eq!(t.insert(HeaderField::new("a", "1")).unwrap(), 0);
        assert_eq!(t.insert(HeaderField::new("b", "2")).unwrap(), 1);
        assert_eq!(t.insert_count(), 2);
        assert_eq!(&t.get(0).unwrap().name[..], b"a");
        assert_eq!(&t.get(1).unwrap().name[..], b"b");
    }

    #[test]
    fn fifo_eviction_removes_oldest_first() {
        // Room for exactly two 34-byte entries.
        let mut t = table(68);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        t.insert(HeaderField::new("c", "3")).unwrap();

        assert_eq!(t.get(0), Err(Error::UnknownIndex(0)));
        assert!(t.get(1).is_ok());
        assert!(t.get(2).is_ok());
        assert!(t.used_size() <= t.capacity());
    }

    #[test]
    fn used_size_tracks_live_entries_exactly() {
        let mut t = table(200);
        t.insert(HeaderField::new("name", "value")).unwrap();
        t.insert(HeaderField::new("x", "y")).unwrap();
        assert_eq!(t.used_size(), (4 + 5 + 32) + (1 + 1 + 32));
    }

    #[test]
    fn oversized_entry_rejected() {
        let mut t = table(40);
        let err = t.insert(HeaderField::new("long-name", "long-value")).unwrap_err();
        assert!(matches!(err, Error::EntryTooLarge { .. }));
    }

    #[test]
    fn capacity_reduction_evicts() {
        let mut t = table(200);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        t.set_capacity(40).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.get(1).is_ok());
    }

    #[test]
    fn capacity_cannot_exceed_maximum() {
        let mut t = DynamicTable::new(100);
        assert!(t.set_capacity(101).is_err());
    }

    #[test]
    fn pinned_entry_blocks_eviction() {
        let mut t = table(68);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        t.pin(0);

        let err = t.insert(HeaderField::new("c", "3")).unwrap_err();
        assert_eq!(err, Error::CapacityReductionBlocked { index: 0 });
        assert!(t.get(0).is_ok());

        t.unpin(0);
        t.insert(HeaderField::new("c", "3")).unwrap();
        assert!(t.get(0).is_err());
    }

    #[test]
    fn can_free_respects_pins() {
        let mut t = table(68);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        assert!(t.can_free(34));
        t.pin(0);
        assert!(!t.can_free(34));
    }

    #[test]
    fn duplicate_refreshes_recency() {
        let mut t = table(1000);
        t.insert(HeaderField::new("a", "1")).unwrap();
        let copy = t.duplicate(0).unwrap();
        assert_eq!(copy, 1);
        assert_eq!(t.get(1).unwrap(), t.get(0).unwrap());
    }

    #[test]
    fn duplicate_of_evicted_entry_fails() {
        let mut t = table(68);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        t.insert(HeaderField::new("c", "3")).unwrap(); // evicts 0
        assert_eq!(t.duplicate(0), Err(Error::UnknownIndex(0)));
    }

    #[test]
    fn relative_addressing_from_insert_count() {
        let mut t = table(1000);
        t.insert(HeaderField::new("a", "1")).unwrap();
        t.insert(HeaderField::new("b", "2")).unwrap();
        assert_eq!(&t.get_relative(0).unwrap().name[..], b"b");
        assert_eq!(&t.get_relative(1).unwrap().name[..], b"a");
        assert!(t.get_relative(2).is_err());
    }

    #[test]
    fn draining_region_covers_oldest_entries_when_full() {
        let mut t = table(136); // four 34-byte entries fill it exactly
        for (n, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
            t.insert(HeaderField::new(n, v)).unwrap();
        }
        assert!(t.is_draining(0));
        assert!(!t.is_draining(3));
    }

    #[test]
    fn nothing_drains_in_a_roomy_table() {
        let mut t = table(1000);
        t.insert(HeaderField::new("a", "1")).unwrap();
        assert!(!t.is_draining(0));
    }
}
