//! Per-slot scratch state written by the allocation pass and consumed by the commit and visibility steps.
//!
//! Every cell is atomic so the allocation pass can run with shared access. Writers must hold the lock of the bucket whose chain
//! contains the slot; the lock's acquire/release ordering makes relaxed accesses sufficient.
//!
//! Each slot holds at most one request. A request for a different block at an already requested slot goes to a shared queue
//! instead, which the commit resolves after the per-slot requests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use voxfuse_core::glam::IVec3;
use voxfuse_core::SmallKeyHashSet;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum AllocationType {
    None = 0,
    /// Allocate a block for this free slot, an empty ordered slot or a recycled entry, keeping its chain link.
    InPlace = 1,
    /// Link a new excess entry after this slot, which is the tail of its chain.
    Excess = 2,
}

impl AllocationType {
    #[inline]
    fn from_u8(x: u8) -> Self {
        match x {
            1 => Self::InPlace,
            2 => Self::Excess,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum VisibilityType {
    Invisible = 0,
    Visible = 1,
    /// Visible, but the block is in external storage and must be swapped in before it can be integrated.
    VisibleEvicted = 2,
    /// Was visible last frame and has not been observed yet this frame.
    PreviouslyVisible = 3,
}

impl VisibilityType {
    #[inline]
    fn from_u8(x: u8) -> Self {
        match x {
            1 => Self::Visible,
            2 => Self::VisibleEvicted,
            3 => Self::PreviouslyVisible,
            _ => Self::Invisible,
        }
    }

    #[inline]
    pub fn is_visible(self) -> bool {
        self != Self::Invisible
    }
}

/// What happened when a step asked for an allocation at some slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestOutcome {
    Requested,
    /// Another step already asked for the same coordinate at the same slot.
    AlreadyRequested,
    /// Another step asked for a different coordinate at the same slot.
    Conflict,
}

pub struct ScratchBuffers {
    allocation: Box<[AtomicU8]>,
    visibility: Box<[AtomicU8]>,
    requested: Box<[[AtomicI32; 3]]>,
    queued: Mutex<SmallKeyHashSet<IVec3>>,
}

impl ScratchBuffers {
    pub fn new(len: usize) -> Self {
        Self {
            allocation: (0..len).map(|_| AtomicU8::new(0)).collect(),
            visibility: (0..len).map(|_| AtomicU8::new(0)).collect(),
            requested: (0..len)
                .map(|_| [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)])
                .collect(),
            queued: Mutex::new(SmallKeyHashSet::default()),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.allocation.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocation.is_empty()
    }

    /// Clears all allocation requests and visibility, then marks the `previously_visible` slots.
    pub fn begin_frame(&mut self, previously_visible: &[usize]) {
        self.queued.get_mut().clear();
        for cell in self.allocation.iter_mut() {
            *cell.get_mut() = AllocationType::None as u8;
        }
        for cell in self.visibility.iter_mut() {
            *cell.get_mut() = VisibilityType::Invisible as u8;
        }
        for &slot in previously_visible {
            *self.visibility[slot].get_mut() = VisibilityType::PreviouslyVisible as u8;
        }
    }

    #[inline]
    pub fn allocation_type(&self, slot: usize) -> AllocationType {
        AllocationType::from_u8(self.allocation[slot].load(Ordering::Relaxed))
    }

    /// The block coordinates of the pending request at `slot`. Meaningless if there is none.
    #[inline]
    pub fn requested_pos(&self, slot: usize) -> IVec3 {
        let [x, y, z] = &self.requested[slot];
        IVec3::new(
            x.load(Ordering::Relaxed),
            y.load(Ordering::Relaxed),
            z.load(Ordering::Relaxed),
        )
    }

    /// Records a request for `pos` at `slot` unless one is already pending. The caller must hold the slot's bucket lock.
    pub fn request(&self, slot: usize, kind: AllocationType, pos: IVec3) -> RequestOutcome {
        debug_assert_ne!(kind, AllocationType::None);

        if self.allocation_type(slot) != AllocationType::None {
            return if self.requested_pos(slot) == pos {
                RequestOutcome::AlreadyRequested
            } else {
                RequestOutcome::Conflict
            };
        }

        let [x, y, z] = &self.requested[slot];
        x.store(pos.x, Ordering::Relaxed);
        y.store(pos.y, Ordering::Relaxed);
        z.store(pos.z, Ordering::Relaxed);
        self.allocation[slot].store(kind as u8, Ordering::Relaxed);

        RequestOutcome::Requested
    }

    /// Queues a request for `pos` that lost its slot to another block. Returns `false` if `pos` was already queued.
    pub fn queue(&self, pos: IVec3) -> bool {
        self.queued.lock().insert(pos)
    }

    /// Every queued block, sorted by coordinates so the commit is deterministic.
    pub fn queued(&self) -> Vec<IVec3> {
        let mut queued: Vec<IVec3> = self.queued.lock().iter().copied().collect();
        queued.sort_unstable_by_key(|p| p.to_array());
        queued
    }

    /// Iterates over `(slot, kind, pos)` for every pending request, in slot order.
    pub fn requests(&self) -> impl Iterator<Item = (usize, AllocationType, IVec3)> + '_ {
        (0..self.len()).filter_map(move |slot| match self.allocation_type(slot) {
            AllocationType::None => None,
            kind => Some((slot, kind, self.requested_pos(slot))),
        })
    }

    #[inline]
    pub fn visibility(&self, slot: usize) -> VisibilityType {
        VisibilityType::from_u8(self.visibility[slot].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_visibility(&self, slot: usize, visibility: VisibilityType) {
        self.visibility[slot].store(visibility as u8, Ordering::Relaxed);
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
