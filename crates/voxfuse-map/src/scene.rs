use crate::allocation::{commit_allocations, request_allocations, AllocationSummary, MarchStats};
use crate::block::{split_voxel_coords, voxel_nearest_point, VoxelBlock};
use crate::buffers::{ScratchBuffers, VisibilityType};
use crate::camera::{CameraPose, View};
use crate::config::{SceneParams, TableConfig};
use crate::hash::{BlockHandle, HashTable, InvariantViolation};
use crate::integration::{integrate_blocks, FrameProjection};
use crate::units::WorldUnits;
use crate::visibility::{refine_visibility, VisibleSet};
use crate::voxel::TsdfVoxel;

use voxfuse_core::allocator::SlotId;
use voxfuse_core::glam::{IVec3, Vec3};
use voxfuse_core::{Backend, BlockAllocator};

/// The sparse voxel map: a hash table of block coordinates, a fixed pool of voxel blocks, and the per-frame visibility state.
///
/// A frame is processed by calling, in order:
///
/// 1. [`Scene::begin_frame`]
/// 2. [`Scene::request_allocations`]
/// 3. [`Scene::commit_allocations`]
/// 4. [`Scene::refine_visibility`]
/// 5. [`Scene::integrate`]
pub struct Scene<V> {
    params: SceneParams,
    table: HashTable,
    buffers: ScratchBuffers,
    pool: BlockAllocator,
    blocks: Vec<VoxelBlock<V>>,
    /// Per pool slot, the block coordinates to integrate this frame.
    targets: Vec<Option<IVec3>>,
    visible: VisibleSet,
}

impl<V: TsdfVoxel> Scene<V> {
    pub fn new(params: SceneParams, table_config: TableConfig) -> Self {
        let table = HashTable::new(table_config.bucket_count, table_config.excess_capacity);
        let buffers = ScratchBuffers::new(table.len());
        let num_blocks = table_config.block_capacity as usize;

        Self {
            params,
            table,
            buffers,
            pool: BlockAllocator::new(table_config.block_capacity),
            blocks: vec![VoxelBlock::default(); num_blocks],
            targets: vec![None; num_blocks],
            visible: VisibleSet::default(),
        }
    }

    #[inline]
    pub fn params(&self) -> &SceneParams {
        &self.params
    }

    /// Only takes effect for frames that start afterwards.
    pub fn set_params(&mut self, params: SceneParams) {
        self.params = params;
    }

    #[inline]
    pub fn table(&self) -> &HashTable {
        &self.table
    }

    #[inline]
    pub fn num_resident_blocks(&self) -> u32 {
        self.pool.num_allocated()
    }

    #[inline]
    pub fn num_free_blocks(&self) -> u32 {
        self.pool.num_free()
    }

    /// The visibility of hash slot `slot` as of the most recent frame.
    #[inline]
    pub fn visibility(&self, slot: usize) -> VisibilityType {
        self.buffers.visibility(slot)
    }

    /// Hash slots of every entry visible in the most recent frame.
    #[inline]
    pub fn visible_entries(&self) -> &[usize] {
        &self.visible.visible
    }

    /// Hash slots of visible entries whose blocks are evicted. Restore them with [`Self::restore_block`] before the next frame
    /// to have them integrated again.
    #[inline]
    pub fn swap_in_requests(&self) -> &[usize] {
        &self.visible.swap_in
    }

    /// Forgets the previous frame's allocation requests and carries its visible entries forward for re-testing.
    pub fn begin_frame(&mut self) {
        self.buffers.begin_frame(&self.visible.visible);
    }

    pub fn request_allocations<B: Backend>(
        &self,
        backend: &B,
        view: &View,
        pose: &CameraPose,
    ) -> MarchStats {
        request_allocations(backend, &self.table, &self.buffers, view, pose, &self.params)
    }

    pub fn commit_allocations(&mut self) -> AllocationSummary {
        commit_allocations(&mut self.table, &self.buffers, &mut self.pool, &mut self.blocks)
    }

    pub fn refine_visibility<B: Backend>(
        &mut self,
        backend: &B,
        view: &View,
        pose: &CameraPose,
        swapping: bool,
    ) -> &VisibleSet {
        self.visible = refine_visibility(
            backend,
            &self.table,
            &self.buffers,
            &self.visible.visible,
            pose.world_to_camera(),
            &view.depth_intrinsics,
            self.params.voxel_size,
            [view.depth.width(), view.depth.height()],
            swapping,
        );

        &self.visible
    }

    /// Fuses `view` into every visible, resident block. Returns the number of blocks integrated.
    pub fn integrate<B: Backend>(&mut self, backend: &B, view: &View, pose: &CameraPose) -> usize {
        let mut num_targets = 0;
        for &slot in &self.visible.visible {
            let entry = self.table.entry(slot);
            if let Some(block_slot) = entry.handle.slot() {
                self.targets[block_slot as usize] = Some(entry.pos);
                num_targets += 1;
            }
        }

        let frame = FrameProjection::new(view, pose);
        integrate_blocks(backend, &mut self.blocks, &self.targets, &frame, &self.params);
        self.targets.fill(None);

        num_targets
    }

    /// The resident block at block coordinates `pos`.
    pub fn block(&self, pos: IVec3) -> Option<&VoxelBlock<V>> {
        let slot = self.table.find(pos)?;
        let block_slot = self.table.entry(slot).handle.slot()?;

        Some(&self.blocks[block_slot as usize])
    }

    /// The voxel whose center is nearest to world point `p`, if its block is resident.
    pub fn voxel_at(&self, p: Vec3) -> Option<&V> {
        let voxel = voxel_nearest_point(WorldUnits(p), self.params.voxel_size);
        let (block, local) = split_voxel_coords(voxel);

        self.block(block.into_inner()).map(|b| &b[local])
    }

    /// Hands the block at `pos` to the caller and keeps tracking its position with an evicted handle. Returns `None` unless the
    /// block is resident.
    pub fn evict_block(&mut self, pos: IVec3) -> Option<VoxelBlock<V>> {
        let slot = self.table.find(pos)?;
        let entry = self.table.entry_mut(slot);
        let block_slot = entry.handle.slot()?;
        entry.handle = BlockHandle::EVICTED;
        self.pool.free(block_slot);
        log::trace!("Evicted block {:?} from pool slot {}", pos, block_slot);

        Some(self.blocks[block_slot as usize])
    }

    /// Moves `block` back into the pool for the evicted entry at `pos`. Returns the new pool slot, or `None` if the entry is
    /// not evicted or the pool is full.
    pub fn restore_block(&mut self, pos: IVec3, block: &VoxelBlock<V>) -> Option<SlotId> {
        let slot = self.table.find(pos)?;
        if !self.table.entry(slot).handle.is_evicted() {
            return None;
        }
        let block_slot = self.pool.allocate()?;
        self.blocks[block_slot as usize] = *block;
        self.table.entry_mut(slot).handle = BlockHandle::from_slot(block_slot);
        log::trace!("Restored block {:?} into pool slot {}", pos, block_slot);

        Some(block_slot)
    }

    /// Forgets the block at `pos`, resident or evicted. The hash slot can be reused by a later allocation, and any chain
    /// through it stays intact. Returns `false` if there is no such block.
    pub fn release_block(&mut self, pos: IVec3) -> bool {
        let slot = match self.table.find(pos) {
            Some(s) => s,
            None => return false,
        };
        let entry = self.table.entry_mut(slot);
        if let Some(block_slot) = entry.handle.slot() {
            self.pool.free(block_slot);
        }
        entry.handle = BlockHandle::RECYCLED;
        log::trace!("Released block {:?}", pos);

        true
    }

    /// Forgets every block.
    pub fn reset(&mut self) {
        self.table.reset();
        self.pool.reset();
        self.visible = VisibleSet::default();
        self.buffers.begin_frame(&[]);
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.table.check_invariants()
    }
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

    use crate::allocation::visit_block;
    use crate::camera::DepthImage;
    use crate::voxel::DepthVoxel;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;
    use voxfuse_core::geometry::Intrinsics;
    use voxfuse_core::{SmallKeyHashSet, Sequential};

    fn small_scene() -> Scene<DepthVoxel> {
        Scene::new(
            SceneParams::default(),
            TableConfig {
                bucket_count: 1 << 12,
                excess_capacity: 1 << 10,
                block_capacity: 1 << 12,
            },
        )
    }

    fn plane_view(depth: f32) -> View {
        View::depth_only(
            DepthImage::filled(32, 24, depth),
            Intrinsics::new(20.0, 20.0, 16.0, 12.0),
        )
    }

    fn run_frame(scene: &mut Scene<DepthVoxel>, view: &View) -> AllocationSummary {
        let pose = CameraPose::IDENTITY;
        scene.begin_frame();
        scene.request_allocations(&Sequential, view, &pose);
        let summary = scene.commit_allocations();
        scene.refine_visibility(&Sequential, view, &pose, false);
        scene.integrate(&Sequential, view, &pose);
        summary
    }

    #[test]
    fn fused_plane_has_zero_crossing_at_the_surface() {
        let mut scene = small_scene();
        let view = plane_view(2.0);
        for _ in 0..3 {
            run_frame(&mut scene, &view);
        }

        assert!(!scene.visible_entries().is_empty());
        assert_eq!(scene.check_invariants(), Ok(()));

        let in_front = scene.voxel_at(Vec3::new(0.0, 0.0, 1.99)).unwrap();
        assert_relative_eq!(f32::from(in_front.sdf), 0.5, epsilon = 1e-3);
        assert_eq!(in_front.w_depth, 3);

        let on_surface = scene.voxel_at(Vec3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(f32::from(on_surface.sdf), 0.0, epsilon = 1e-3);

        let behind = scene.voxel_at(Vec3::new(0.0, 0.0, 2.01)).unwrap();
        assert_relative_eq!(f32::from(behind.sdf), -0.5, epsilon = 1e-3);

        assert!(scene.voxel_at(Vec3::new(0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn evicted_blocks_are_requested_back_and_restored() {
        let mut scene = small_scene();
        let view = plane_view(2.0);
        run_frame(&mut scene, &view);

        let pos = IVec3::new(0, 0, 49);
        let resident = scene.num_resident_blocks();
        let evicted = scene.evict_block(pos).unwrap();
        assert!(scene.block(pos).is_none());
        assert!(scene.evict_block(pos).is_none());
        assert_eq!(scene.num_resident_blocks(), resident - 1);

        run_frame(&mut scene, &view);
        let slot = scene.table().find(pos).unwrap();
        assert_eq!(scene.visibility(slot), VisibilityType::VisibleEvicted);
        assert_eq!(scene.swap_in_requests(), &[slot]);
        // Still evicted, so nothing new was allocated for it.
        assert_eq!(scene.check_invariants(), Ok(()));

        assert!(scene.restore_block(pos, &evicted).is_some());
        assert_eq!(scene.block(pos), Some(&evicted));
        assert!(scene.restore_block(pos, &evicted).is_none());

        run_frame(&mut scene, &view);
        assert!(scene.swap_in_requests().is_empty());
        assert_ne!(scene.block(pos), Some(&evicted));
    }

    #[test]
    fn released_blocks_are_reallocated_fresh() {
        let mut scene = small_scene();
        let view = plane_view(2.0);
        run_frame(&mut scene, &view);

        let pos = IVec3::new(0, 0, 49);
        assert!(scene.release_block(pos));
        assert!(!scene.release_block(pos));
        assert!(scene.block(pos).is_none());

        let summary = run_frame(&mut scene, &view);
        assert!(summary.allocated.contains(&pos));
        assert_eq!(scene.block(pos).unwrap().voxels.iter().map(|v| v.w_depth).max(), Some(1));
        assert_eq!(scene.check_invariants(), Ok(()));
    }

    #[test]
    fn reset_forgets_every_block() {
        let mut scene = small_scene();
        run_frame(&mut scene, &plane_view(2.0));
        assert!(scene.num_resident_blocks() > 0);

        scene.reset();
        assert_eq!(scene.num_resident_blocks(), 0);
        assert_eq!(scene.table().num_live_entries(), 0);
        assert!(scene.visible_entries().is_empty());
        assert!(scene.voxel_at(Vec3::new(0.0, 0.0, 2.0)).is_none());
    }

    #[test]
    fn blocks_leaving_the_view_stop_being_visible() {
        let mut scene = small_scene();
        run_frame(&mut scene, &plane_view(2.0));
        let first = scene.visible_entries().to_vec();
        assert!(!first.is_empty());

        // An empty frame re-tests last frame's entries. They are still in view, so they stay visible.
        run_frame(&mut scene, &plane_view(0.0));
        assert_eq!(scene.visible_entries(), &first[..]);

        // Turned away, nothing is visible.
        let turned = CameraPose::from_camera_to_world(
            voxfuse_core::glam::Mat4::from_rotation_y(std::f32::consts::PI),
        );
        let view = plane_view(0.0);
        scene.begin_frame();
        scene.request_allocations(&Sequential, &view, &turned);
        scene.commit_allocations();
        scene.refine_visibility(&Sequential, &view, &turned, false);
        assert!(scene.visible_entries().is_empty());
    }

    #[test]
    fn released_excess_slots_are_reused() {
        let mut scene = Scene::<DepthVoxel>::new(
            SceneParams::default(),
            TableConfig {
                bucket_count: 16,
                excess_capacity: 1,
                block_capacity: 8,
            },
        );
        let a = IVec3::ZERO;
        let b = IVec3::new(16, 0, 0);
        let c = IVec3::new(32, 0, 0);

        for block in [a, b] {
            scene.begin_frame();
            visit_block(&scene.table, &scene.buffers, block);
            assert_eq!(scene.commit_allocations().allocated, vec![block]);
        }
        assert_eq!(scene.table().num_free_excess(), 0);
        assert!(scene.release_block(b));

        // The only excess slot is taken by b's recycled entry, which c reuses in place.
        for _ in 0..3 {
            scene.begin_frame();
            visit_block(&scene.table, &scene.buffers, c);
            let summary = scene.commit_allocations();
            assert_eq!(summary.failed, 0);
            assert_eq!(summary.allocated, vec![c]);
            assert_eq!(scene.table().num_live_entries(), 2);
            assert!(scene.release_block(c));
        }
        assert_eq!(scene.check_invariants(), Ok(()));
    }

    fn splitmix64(state: &mut u64) -> u64 {
        *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[test]
    fn random_allocate_release_evict_sequence_keeps_the_table_consistent() {
        let mut scene = Scene::<DepthVoxel>::new(
            SceneParams::default(),
            TableConfig {
                bucket_count: 16,
                excess_capacity: 8,
                block_capacity: 12,
            },
        );
        // Few buckets and a small pool, so chains, recycling, and exhaustion all happen.
        let coords: Vec<IVec3> = (0..48).map(|i| IVec3::new(i % 6, (i / 6) % 4, i / 24)).collect();
        let mut tracked = SmallKeyHashSet::<IVec3>::default();
        let mut evicted = BTreeMap::<[i32; 3], VoxelBlock<DepthVoxel>>::new();
        let mut rng = 0x5eed;
        let mut pick = |n: usize| (splitmix64(&mut rng) % n as u64) as usize;

        for step in 0..2000 {
            match pick(5) {
                0 | 1 => {
                    scene.begin_frame();
                    let mut untracked = SmallKeyHashSet::default();
                    for _ in 0..1 + pick(4) {
                        let block = coords[pick(coords.len())];
                        visit_block(&scene.table, &scene.buffers, block);
                        if !tracked.contains(&block) {
                            untracked.insert(block);
                        }
                    }
                    let summary = scene.commit_allocations();
                    assert_eq!(
                        summary.allocated.len() + summary.failed as usize,
                        untracked.len(),
                        "step {}",
                        step
                    );
                    for block in summary.allocated {
                        assert!(untracked.contains(&block));
                        tracked.insert(block);
                    }
                }
                2 => {
                    let block = coords[pick(coords.len())];
                    assert_eq!(scene.release_block(block), tracked.remove(&block), "step {}", step);
                    evicted.remove(&block.to_array());
                }
                3 => {
                    let block = coords[pick(coords.len())];
                    let resident = tracked.contains(&block) && !evicted.contains_key(&block.to_array());
                    match scene.evict_block(block) {
                        Some(data) => {
                            assert!(resident, "step {}", step);
                            evicted.insert(block.to_array(), data);
                        }
                        None => assert!(!resident, "step {}", step),
                    }
                }
                _ => {
                    let first = evicted.iter().next().map(|(&key, data)| (key, *data));
                    if let Some((key, data)) = first {
                        let block = IVec3::from(key);
                        if scene.restore_block(block, &data).is_some() {
                            evicted.remove(&key);
                        } else {
                            assert_eq!(scene.num_free_blocks(), 0, "step {}", step);
                        }
                    }
                }
            }

            assert_eq!(scene.check_invariants(), Ok(()), "step {}", step);
            assert_eq!(scene.table().num_live_entries(), tracked.len(), "step {}", step);
            for block in &tracked {
                assert!(scene.table().find(*block).is_some(), "step {}", step);
            }
            assert_eq!(
                scene.num_resident_blocks() as usize,
                tracked.len() - evicted.len(),
                "step {}",
                step
            );
        }
    }
}
