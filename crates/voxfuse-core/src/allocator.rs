/// An index handed out by a [`BlockAllocator`]. Always less than the allocator's capacity.
pub type SlotId = u32;

/// Hands out up to `capacity` slot indices in `[0, capacity)`.
///
/// This is the bookkeeping half of a fixed-size pool; the storage itself lives elsewhere and is indexed by [`SlotId`]. Free
/// slots are kept on a stack, so the most recently freed slot is the next one handed out. A fresh allocator hands out slots in
/// ascending order.
#[derive(Clone, Debug)]
pub struct BlockAllocator {
    free: Vec<SlotId>,
    capacity: u32,
}

impl BlockAllocator {
    pub fn new(capacity: u32) -> Self {
        let mut allocator = Self {
            free: Vec::with_capacity(capacity as usize),
            capacity,
        };
        allocator.reset();
        allocator
    }

    /// Marks every slot as free again.
    pub fn reset(&mut self) {
        self.free.clear();
        self.free.extend((0..self.capacity).rev());
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn num_free(&self) -> u32 {
        self.free.len() as u32
    }

    #[inline]
    pub fn num_allocated(&self) -> u32 {
        self.capacity - self.num_free()
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Returns `None` when every slot is in use.
    #[inline]
    pub fn allocate(&mut self) -> Option<SlotId> {
        self.free.pop()
    }

    /// Returns `id` to the free stack. `id` must have come from [`Self::allocate`] and must not already be free.
    #[inline]
    pub fn free(&mut self, id: SlotId) {
        debug_assert!(id < self.capacity);
        debug_assert!(self.free.len() < self.capacity as usize);
        self.free.push(id);
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
