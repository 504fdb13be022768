use static_assertions::const_assert_eq;
use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;

/// An array of integer lock cells, one per guarded resource.
///
/// Locks are only ever *tried*; there is no blocking acquire. A caller that loses the race is expected to skip its work and let
/// a later pass redo it.
pub struct LockCells {
    cells: Box<[AtomicI32]>,
}

const_assert_eq!(mem::size_of::<AtomicI32>(), 4);

impl LockCells {
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicI32::new(UNLOCKED)).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Atomically swaps cell `index` from unlocked to locked. Returns `None` if another holder already owns it.
    ///
    /// The returned guard unlocks the cell when dropped.
    #[inline]
    pub fn try_lock(&self, index: usize) -> Option<LockGuard<'_>> {
        let cell = &self.cells[index];
        cell.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| LockGuard { cell })
    }

    #[inline]
    pub fn is_locked(&self, index: usize) -> bool {
        self.cells[index].load(Ordering::Relaxed) != UNLOCKED
    }

    /// Forcibly unlocks every cell. Requires exclusive access, so no guards can be alive.
    pub fn clear(&mut self) {
        for cell in self.cells.iter_mut() {
            *cell.get_mut() = UNLOCKED;
        }
    }
}

/// Proof of ownership of one cell in [`LockCells`].
pub struct LockGuard<'a> {
    cell: &'a AtomicI32,
}

impl Drop for LockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.cell.store(UNLOCKED, Ordering::Release);
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
