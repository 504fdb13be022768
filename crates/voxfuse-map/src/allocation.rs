//! Finds the blocks touched by each depth measurement and requests storage for the ones that don't exist yet.
//!
//! The pass runs in two phases:
//!
//! 1. [`request_allocations`] marches every pixel's truncation band through block space, in parallel. Each step locks the
//!    bucket of the block it lands in, then either marks an existing entry visible or records an allocation request in the
//!    [`ScratchBuffers`]. A request for a slot already requested by a different block is queued. A step that finds the bucket
//!    locked by another worker is deferred; the next frame will usually observe the same block again.
//! 2. [`commit_allocations`] consumes the per-slot requests, then the queue, sequentially, and mutates the [`HashTable`].

use crate::block::{world_to_block_space, VoxelBlock};
use crate::buffers::{AllocationType, RequestOutcome, ScratchBuffers, VisibilityType};
use crate::camera::{CameraPose, View};
use crate::config::SceneParams;
use crate::hash::{BlockHandle, HashTable, Placement};
use crate::units::WorldUnits;
use crate::voxel::TsdfVoxel;

use std::sync::atomic::{AtomicU64, Ordering};
use voxfuse_core::geometry::{Intrinsics, Ray};
use voxfuse_core::glam::{IVec3, Mat4, Vec2};
use voxfuse_core::{Backend, BlockAllocator};

/// What a single ray-march step did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The block already has an entry, which is now marked visible.
    Found,
    /// An allocation for the block is pending, either from this step or an earlier one.
    Requested,
    /// The target slot was requested by a different block, so this block waits in the queue.
    Queued,
    /// The bucket was locked by another worker.
    Deferred,
}

/// Ray-march steps that did not resolve against their slot directly.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MarchStats {
    /// Steps skipped on lock contention. Always zero on the sequential backend.
    pub deferred: u64,
    /// Steps whose block was queued behind a different request for the same slot.
    pub queued: u64,
}

impl MarchStats {
    fn record(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Deferred => self.deferred += 1,
            StepOutcome::Queued => self.queued += 1,
            StepOutcome::Found | StepOutcome::Requested => {}
        }
    }
}

/// Runs the allocation ray march for every pixel of `view`.
pub fn request_allocations<B: Backend>(
    backend: &B,
    table: &HashTable,
    buffers: &ScratchBuffers,
    view: &View,
    pose: &CameraPose,
    params: &SceneParams,
) -> MarchStats {
    let deferred = AtomicU64::new(0);
    let queued = AtomicU64::new(0);
    let depth = &view.depth;
    backend.for_each_index(depth.pixels().len(), |i| {
        let (x, y) = depth.coords_of(i);
        let stats = request_allocations_for_pixel(
            table,
            buffers,
            Vec2::new(x as f32, y as f32),
            depth.pixels()[i],
            pose.camera_to_world(),
            &view.depth_intrinsics,
            params,
        );
        if stats.deferred > 0 {
            deferred.fetch_add(stats.deferred, Ordering::Relaxed);
        }
        if stats.queued > 0 {
            queued.fetch_add(stats.queued, Ordering::Relaxed);
        }
    });

    MarchStats {
        deferred: deferred.into_inner(),
        queued: queued.into_inner(),
    }
}

/// Marches the segment `[depth - mu, depth + mu]` along the ray through `pixel`, visiting every block it crosses.
pub fn request_allocations_for_pixel(
    table: &HashTable,
    buffers: &ScratchBuffers,
    pixel: Vec2,
    depth: f32,
    camera_to_world: &Mat4,
    intrinsics: &Intrinsics,
    params: &SceneParams,
) -> MarchStats {
    let mut stats = MarchStats::default();
    let mu = params.mu;
    // Negated comparison so NaN is rejected too.
    if !(depth > 0.0)
        || depth - mu < 0.0
        || depth - mu < params.view_frustum_min
        || depth + mu > params.view_frustum_max
    {
        return stats;
    }

    let p = intrinsics.unproject(pixel, depth);
    let norm = p.length();
    let to_block_space = |camera_point| {
        world_to_block_space(
            WorldUnits(camera_to_world.transform_point3(camera_point)),
            params.voxel_size,
        )
        .into_inner()
    };
    let segment = Ray::between(
        to_block_space(p * (1.0 - mu / norm)),
        to_block_space(p * (1.0 + mu / norm)),
    );
    let num_steps = (2.0 * segment.velocity().length()).ceil() as u32;

    for point in segment.sample_points(num_steps) {
        stats.record(visit_block(table, buffers, point.floor().as_ivec3()));
    }

    stats
}

/// One step of the march: under the bucket lock, either mark `block`'s entry visible or request an entry for it.
pub fn visit_block(table: &HashTable, buffers: &ScratchBuffers, block: IVec3) -> StepOutcome {
    let _guard = match table.locks().try_lock(table.bucket_of(block)) {
        Some(guard) => guard,
        None => return StepOutcome::Deferred,
    };

    let outcome = match table.placement(block) {
        Placement::Existing(slot) => {
            let visibility = if table.entry(slot).handle.is_evicted() {
                VisibilityType::VisibleEvicted
            } else {
                VisibilityType::Visible
            };
            buffers.set_visibility(slot, visibility);
            return StepOutcome::Found;
        }
        Placement::Free(slot) => {
            let outcome = buffers.request(slot, AllocationType::InPlace, block);
            if outcome != RequestOutcome::Conflict {
                buffers.set_visibility(slot, VisibilityType::Visible);
            }
            outcome
        }
        // The new excess entry only becomes visible once a later frame finds it.
        Placement::After(tail) => buffers.request(tail, AllocationType::Excess, block),
    };

    match outcome {
        RequestOutcome::Requested | RequestOutcome::AlreadyRequested => StepOutcome::Requested,
        RequestOutcome::Conflict => {
            buffers.queue(block);
            StepOutcome::Queued
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AllocationSummary {
    /// Block coordinates of every new entry: per-slot requests in slot order, then queued blocks.
    pub allocated: Vec<IVec3>,
    /// Requests dropped because the block pool or the excess region was full.
    pub failed: u32,
}

/// Turns the pending requests in `buffers` into hash entries backed by fresh blocks from `pool`.
pub fn commit_allocations<V: TsdfVoxel>(
    table: &mut HashTable,
    buffers: &ScratchBuffers,
    pool: &mut BlockAllocator,
    blocks: &mut [VoxelBlock<V>],
) -> AllocationSummary {
    let mut commit = Commit {
        table,
        buffers,
        pool,
        blocks,
        summary: AllocationSummary::default(),
    };

    for (slot, kind, pos) in buffers.requests() {
        commit.insert(slot, kind, pos);
    }

    // Queued blocks are placed against the table as the per-slot requests left it.
    for pos in buffers.queued() {
        match commit.table.placement(pos) {
            Placement::Existing(_) => {}
            Placement::Free(slot) => {
                buffers.set_visibility(slot, VisibilityType::Visible);
                commit.insert(slot, AllocationType::InPlace, pos);
            }
            Placement::After(tail) => commit.insert(tail, AllocationType::Excess, pos),
        }
    }

    let Commit {
        table,
        pool,
        summary,
        ..
    } = commit;
    if summary.failed > 0 {
        log::warn!(
            "Dropped {} block allocations; {} pool blocks and {} excess slots remain free",
            summary.failed,
            pool.num_free(),
            table.num_free_excess()
        );
    }

    summary
}

struct Commit<'a, V> {
    table: &'a mut HashTable,
    buffers: &'a ScratchBuffers,
    pool: &'a mut BlockAllocator,
    blocks: &'a mut [VoxelBlock<V>],
    summary: AllocationSummary,
}

impl<V: TsdfVoxel> Commit<'_, V> {
    fn insert(&mut self, slot: usize, kind: AllocationType, pos: IVec3) {
        let block_slot = if kind == AllocationType::Excess && self.table.num_free_excess() == 0 {
            None
        } else {
            self.pool.allocate()
        };
        let block_slot = match block_slot {
            Some(s) => s,
            None => {
                self.summary.failed += 1;
                // An excess request's slot is the chain tail, which belongs to some other block.
                if kind == AllocationType::InPlace {
                    self.buffers.set_visibility(slot, VisibilityType::Invisible);
                }
                return;
            }
        };

        self.blocks[block_slot as usize] = VoxelBlock::default();
        let handle = BlockHandle::from_slot(block_slot);
        match kind {
            AllocationType::InPlace => self.table.insert_in_place(slot, pos, handle),
            AllocationType::Excess => {
                if self.table.insert_excess(slot, pos, handle).is_none() {
                    self.pool.free(block_slot);
                    self.summary.failed += 1;
                    return;
                }
            }
            AllocationType::None => unreachable!(),
        }
        self.summary.allocated.push(pos);
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
