//! The spatial hash from block coordinates to block storage.
//!
//! # Layout
//!
//! The table is one array of [`HashEntry`]s split into two regions:
//!
//! - the **ordered** region, `[0, bucket_count)`, holds one entry per bucket, addressed by [`hash_index`]
//! - the **excess** region, `[bucket_count, bucket_count + excess_capacity)`, holds entries for coordinates that collided with
//!   an occupied bucket
//!
//! Each bucket is the head of a singly linked chain. An entry with `offset >= 1` continues at excess slot
//! `bucket_count + offset - 1`. Excess entries are only reachable by walking a chain from their bucket.
//!
//! # Synchronization
//!
//! The table owns one lock cell per bucket. The allocation pass holds a bucket's lock for the read-modify-write of that bucket's
//! chain and scratch buffers. Entries themselves are only mutated with exclusive `&mut` access, between passes.

use voxfuse_core::allocator::{BlockAllocator, SlotId};
use voxfuse_core::glam::IVec3;
use voxfuse_core::{LockCells, SmallKeyHashSet};

/// Maps block coordinates to a bucket in `[0, bucket_count)`.
///
/// Collisions are expected; they are resolved by the excess chains of [`HashTable`].
#[inline]
pub fn hash_index(pos: IVec3, bucket_count: usize) -> usize {
    let h = (pos.x as u32).wrapping_mul(73856093)
        ^ (pos.y as u32).wrapping_mul(19349669)
        ^ (pos.z as u32).wrapping_mul(83492791);
    h as usize % bucket_count
}

/// Where the voxels of a [`HashEntry`] live.
///
/// Non-negative values are indices into the block pool. Negative values are sentinels.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockHandle(pub i32);

impl BlockHandle {
    /// The block was handed to external storage, but the entry still tracks its position.
    pub const EVICTED: Self = Self(-1);
    /// The entry has never held a block.
    pub const UNALLOCATED: Self = Self(-2);
    /// The entry's block was released. The slot may be reused, but its chain link is preserved.
    pub const RECYCLED: Self = Self(-3);

    #[inline]
    pub fn from_slot(slot: SlotId) -> Self {
        Self(slot as i32)
    }

    /// The pool slot, if the block is resident.
    #[inline]
    pub fn slot(self) -> Option<SlotId> {
        (self.0 >= 0).then(|| self.0 as SlotId)
    }

    /// Resident or evicted: the entry describes a real block.
    #[inline]
    pub fn has_known_position(self) -> bool {
        self.0 >= -1
    }

    #[inline]
    pub fn is_evicted(self) -> bool {
        self == Self::EVICTED
    }

    /// Available for a new coordinate.
    #[inline]
    pub fn is_free(self) -> bool {
        self.0 < -1
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HashEntry {
    /// Block coordinates.
    pub pos: IVec3,
    pub handle: BlockHandle,
    /// `>= 1` if the chain continues in the excess region.
    pub offset: i32,
}

impl HashEntry {
    pub const EMPTY: Self = Self {
        pos: IVec3::ZERO,
        handle: BlockHandle::UNALLOCATED,
        offset: 0,
    };

    /// `true` if this entry holds (or tracks the evicted block for) `pos`.
    #[inline]
    pub fn matches(&self, pos: IVec3) -> bool {
        self.pos == pos && self.handle.has_known_position()
    }

    #[inline]
    pub fn next_in_chain(&self, bucket_count: usize) -> Option<usize> {
        (self.offset >= 1).then(|| bucket_count + self.offset as usize - 1)
    }
}

impl Default for HashEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

pub struct HashTable {
    entries: Vec<HashEntry>,
    bucket_count: usize,
    /// Free offsets into the excess region.
    excess: BlockAllocator,
    locks: LockCells,
}

impl HashTable {
    pub fn new(bucket_count: usize, excess_capacity: usize) -> Self {
        assert!(bucket_count > 0, "hash table needs at least one bucket");

        Self {
            entries: vec![HashEntry::EMPTY; bucket_count + excess_capacity],
            bucket_count,
            excess: BlockAllocator::new(excess_capacity as u32),
            locks: LockCells::new(bucket_count),
        }
    }

    /// Forgets every entry.
    pub fn reset(&mut self) {
        self.entries.fill(HashEntry::EMPTY);
        self.excess.reset();
        self.locks.clear();
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    #[inline]
    pub fn excess_capacity(&self) -> usize {
        self.excess.capacity() as usize
    }

    #[inline]
    pub fn num_free_excess(&self) -> usize {
        self.excess.num_free() as usize
    }

    /// Total number of slots, ordered and excess.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[HashEntry] {
        &self.entries
    }

    #[inline]
    pub fn entry(&self, slot: usize) -> &HashEntry {
        &self.entries[slot]
    }

    #[inline]
    pub fn entry_mut(&mut self, slot: usize) -> &mut HashEntry {
        &mut self.entries[slot]
    }

    #[inline]
    pub fn locks(&self) -> &LockCells {
        &self.locks
    }

    #[inline]
    pub fn bucket_of(&self, pos: IVec3) -> usize {
        hash_index(pos, self.bucket_count)
    }

    /// Every slot of the chain starting at `bucket`, head first.
    pub fn chain(&self, bucket: usize) -> Chain<'_> {
        Chain {
            table: self,
            next: Some(bucket),
            remaining: self.excess_capacity() + 1,
        }
    }

    /// The slot of the entry for `pos`, resident or evicted.
    pub fn find(&self, pos: IVec3) -> Option<usize> {
        self.chain(self.bucket_of(pos))
            .find(|&slot| self.entries[slot].matches(pos))
    }

    /// Where the entry for `pos` is, or where a new one would go.
    ///
    /// A new entry prefers the first free slot of its chain, so slots released with a recycled handle are reused before the
    /// excess region shrinks.
    pub fn placement(&self, pos: IVec3) -> Placement {
        let mut free = None;
        let mut tail = self.bucket_of(pos);
        for slot in self.chain(tail) {
            let entry = &self.entries[slot];
            if entry.matches(pos) {
                return Placement::Existing(slot);
            }
            if free.is_none() && entry.handle.is_free() {
                free = Some(slot);
            }
            tail = slot;
        }

        match free {
            Some(slot) => Placement::Free(slot),
            None => Placement::After(tail),
        }
    }

    /// Iterates over `(slot, entry)` for every entry that describes a block.
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &HashEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.handle.has_known_position())
    }

    pub fn num_live_entries(&self) -> usize {
        self.iter_live().count()
    }

    /// Writes `pos` into `slot`, which must be free: an empty ordered slot or a recycled entry. An existing chain link is
    /// kept.
    pub(crate) fn insert_in_place(&mut self, slot: usize, pos: IVec3, handle: BlockHandle) {
        let entry = &mut self.entries[slot];
        debug_assert!(entry.handle.is_free());
        entry.pos = pos;
        entry.handle = handle;
    }

    /// Links a new excess entry for `pos` after `tail`, which must be the last slot of its chain. Returns the new slot, or
    /// `None` if the excess region is full.
    pub(crate) fn insert_excess(
        &mut self,
        tail: usize,
        pos: IVec3,
        handle: BlockHandle,
    ) -> Option<usize> {
        debug_assert_eq!(self.entries[tail].offset, 0);
        let offset = self.excess.allocate()?;
        let slot = self.bucket_count + offset as usize;
        self.entries[slot] = HashEntry {
            pos,
            handle,
            offset: 0,
        };
        self.entries[tail].offset = offset as i32 + 1;
        Some(slot)
    }

    /// Verifies that no two live entries share a coordinate, that every chain terminates without revisiting a slot, and that
    /// every live entry is reachable from the bucket its coordinate hashes to.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut reached = SmallKeyHashSet::default();
        let mut coords = SmallKeyHashSet::default();

        for bucket in 0..self.bucket_count {
            let mut visited = SmallKeyHashSet::default();
            let mut next = Some(bucket);
            while let Some(slot) = next {
                if !visited.insert(slot) || slot >= self.entries.len() {
                    return Err(InvariantViolation::ChainCycle { bucket, slot });
                }
                let entry = &self.entries[slot];
                if entry.handle.has_known_position() {
                    let expected = self.bucket_of(entry.pos);
                    if expected != bucket {
                        return Err(InvariantViolation::WrongBucket {
                            slot,
                            expected,
                            actual: bucket,
                        });
                    }
                    if !coords.insert(entry.pos) {
                        return Err(InvariantViolation::DuplicateEntry {
                            pos: entry.pos,
                            slot,
                        });
                    }
                }
                reached.insert(slot);
                next = entry.next_in_chain(self.bucket_count);
            }
        }

        for (slot, _) in self.iter_live() {
            if !reached.contains(&slot) {
                return Err(InvariantViolation::Unreachable { slot });
            }
        }

        Ok(())
    }
}

/// The result of [`HashTable::placement`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// The slot of the existing entry.
    Existing(usize),
    /// A free slot in the chain, reusable in place.
    Free(usize),
    /// The tail of a chain without free slots. A new entry must be linked after it.
    After(usize),
}

/// Walks a chain of slots. Stops early if the chain is longer than the excess region could possibly hold.
pub struct Chain<'a> {
    table: &'a HashTable,
    next: Option<usize>,
    remaining: usize,
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let slot = self.next?;
        if self.remaining == 0 {
            debug_assert!(false, "hash chain is cyclic");
            return None;
        }
        self.remaining -= 1;
        self.next = self.table.entries[slot].next_in_chain(self.table.bucket_count);
        Some(slot)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvariantViolation {
    DuplicateEntry { pos: IVec3, slot: usize },
    ChainCycle { bucket: usize, slot: usize },
    WrongBucket { slot: usize, expected: usize, actual: usize },
    Unreachable { slot: usize },
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_index_is_stable() {
        let n = 1 << 20;
        assert_eq!(hash_index(IVec3::ZERO, n), 0);
        assert_eq!(hash_index(IVec3::new(1, 0, 0), n), 455773);
        assert_eq!(hash_index(IVec3::new(0, 1, 0), n), 475301);
        assert_eq!(hash_index(IVec3::new(-1, 2, 3), n), 685516);
        assert_eq!(
            hash_index(IVec3::new(-1, 2, 3), n),
            hash_index(IVec3::new(-1, 2, 3), n)
        );
    }

    #[test]
    fn handle_sentinels() {
        assert!(BlockHandle::from_slot(0).has_known_position());
        assert!(BlockHandle::EVICTED.has_known_position());
        assert!(!BlockHandle::UNALLOCATED.has_known_position());
        assert!(!BlockHandle::RECYCLED.has_known_position());
        assert!(BlockHandle::RECYCLED.is_free());
        assert_eq!(BlockHandle::from_slot(7).slot(), Some(7));
        assert_eq!(BlockHandle::EVICTED.slot(), None);
    }

    #[test]
    fn colliding_coordinates_chain_into_excess() {
        let mut table = HashTable::new(16, 4);
        let a = IVec3::new(0, 0, 0);
        let b = IVec3::new(16, 0, 0);
        let c = IVec3::new(32, 0, 0);
        assert_eq!(table.bucket_of(a), table.bucket_of(b));
        assert_eq!(table.bucket_of(a), table.bucket_of(c));

        let bucket = table.bucket_of(a);
        table.insert_in_place(bucket, a, BlockHandle::from_slot(0));
        let b_slot = table.insert_excess(bucket, b, BlockHandle::from_slot(1)).unwrap();
        let c_slot = table.insert_excess(b_slot, c, BlockHandle::EVICTED).unwrap();

        assert_eq!(b_slot, 16);
        assert_eq!(c_slot, 17);
        assert_eq!(table.entry(bucket).offset, 1);
        assert_eq!(table.entry(b_slot).offset, 2);

        assert_eq!(table.chain(bucket).collect::<Vec<_>>(), vec![bucket, 16, 17]);
        assert_eq!(table.find(a), Some(bucket));
        assert_eq!(table.find(b), Some(b_slot));
        assert_eq!(table.find(c), Some(c_slot));
        assert_eq!(table.find(IVec3::new(48, 0, 0)), None);
        assert_eq!(table.num_live_entries(), 3);
        assert_eq!(table.check_invariants(), Ok(()));
    }

    #[test]
    fn excess_exhaustion_is_reported() {
        let mut table = HashTable::new(16, 1);
        let bucket = table.bucket_of(IVec3::ZERO);
        table.insert_in_place(bucket, IVec3::ZERO, BlockHandle::from_slot(0));
        let b = table
            .insert_excess(bucket, IVec3::new(16, 0, 0), BlockHandle::from_slot(1))
            .unwrap();
        assert_eq!(
            table.insert_excess(b, IVec3::new(32, 0, 0), BlockHandle::from_slot(2)),
            None
        );
        assert_eq!(table.entry(b).offset, 0);
        assert_eq!(table.num_free_excess(), 0);
    }

    #[test]
    fn recycled_entries_keep_their_chain() {
        let mut table = HashTable::new(16, 4);
        let bucket = table.bucket_of(IVec3::ZERO);
        table.insert_in_place(bucket, IVec3::ZERO, BlockHandle::from_slot(0));
        let b = IVec3::new(16, 0, 0);
        table.insert_excess(bucket, b, BlockHandle::from_slot(1)).unwrap();

        table.entry_mut(bucket).handle = BlockHandle::RECYCLED;
        assert_eq!(table.find(IVec3::ZERO), None);
        assert!(table.find(b).is_some());
        assert_eq!(table.check_invariants(), Ok(()));
    }

    #[test]
    fn placement_prefers_the_first_free_slot() {
        let mut table = HashTable::new(16, 4);
        let a = IVec3::ZERO;
        let b = IVec3::new(16, 0, 0);
        let c = IVec3::new(32, 0, 0);
        let bucket = table.bucket_of(a);

        assert_eq!(table.placement(a), Placement::Free(bucket));
        table.insert_in_place(bucket, a, BlockHandle::from_slot(0));
        assert_eq!(table.placement(a), Placement::Existing(bucket));
        assert_eq!(table.placement(b), Placement::After(bucket));

        let b_slot = table.insert_excess(bucket, b, BlockHandle::from_slot(1)).unwrap();
        assert_eq!(table.placement(c), Placement::After(b_slot));

        // A recycled excess entry is reused before anything is linked after the tail.
        table.entry_mut(b_slot).handle = BlockHandle::RECYCLED;
        assert_eq!(table.placement(c), Placement::Free(b_slot));
        table.insert_in_place(b_slot, c, BlockHandle::from_slot(1));
        assert_eq!(table.find(c), Some(b_slot));
        assert_eq!(table.num_free_excess(), 3);

        // The ordered slot comes first in its chain.
        table.entry_mut(bucket).handle = BlockHandle::RECYCLED;
        table.entry_mut(b_slot).handle = BlockHandle::RECYCLED;
        assert_eq!(table.placement(b), Placement::Free(bucket));
        assert_eq!(table.check_invariants(), Ok(()));
    }

    #[test]
    fn invariant_checks_catch_corruption() {
        let mut table = HashTable::new(16, 4);
        let bucket = table.bucket_of(IVec3::ZERO);
        table.insert_in_place(bucket, IVec3::ZERO, BlockHandle::from_slot(0));
        let slot = table
            .insert_excess(bucket, IVec3::new(16, 0, 0), BlockHandle::from_slot(1))
            .unwrap();

        // Duplicate coordinate in the chain.
        table.entry_mut(slot).pos = IVec3::ZERO;
        assert!(matches!(
            table.check_invariants(),
            Err(InvariantViolation::DuplicateEntry { .. })
        ));

        // Chain that points back at itself.
        table.entry_mut(slot).pos = IVec3::new(16, 0, 0);
        table.entry_mut(slot).offset = 1;
        assert!(matches!(
            table.check_invariants(),
            Err(InvariantViolation::ChainCycle { .. })
        ));

        // Live entry that no chain reaches.
        table.entry_mut(slot).offset = 0;
        table.entry_mut(bucket).offset = 0;
        assert!(matches!(
            table.check_invariants(),
            Err(InvariantViolation::Unreachable { .. })
        ));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut table = HashTable::new(16, 2);
        table.insert_in_place(0, IVec3::ZERO, BlockHandle::from_slot(0));
        table.insert_excess(0, IVec3::new(16, 0, 0), BlockHandle::from_slot(1));
        table.reset();
        assert_eq!(table.num_live_entries(), 0);
        assert_eq!(table.num_free_excess(), 2);
        assert_eq!(table.entry(0), &HashEntry::EMPTY);
    }
}
