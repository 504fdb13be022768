use crate::units::{BlockUnits, VoxelUnits, WorldUnits};
use crate::voxel::TsdfVoxel;

use ndshape::{ConstPow2Shape3i32, ConstShape};
use std::ops::{Index, IndexMut};
use voxfuse_core::glam::{IVec3, Vec3};
use voxfuse_core::static_assertions::const_assert_eq;

/// The 3D array shape of a [`VoxelBlock`], x-major.
pub type BlockShape = ConstPow2Shape3i32<3, 3, 3>;
const_assert_eq!(BlockShape::SIZE, 8 * 8 * 8);

/// Voxels along one edge of a [`VoxelBlock`].
pub const BLOCK_EDGE: i32 = BlockShape::ARRAY[0];
pub const BLOCK_VOLUME: usize = BlockShape::USIZE;

/// The unit of allocation: a dense cube of `8 × 8 × 8` voxels, laid out by [`BlockShape`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VoxelBlock<V> {
    pub voxels: [V; BLOCK_VOLUME],
}

impl<V: TsdfVoxel> Default for VoxelBlock<V> {
    fn default() -> Self {
        Self {
            voxels: [V::default(); BLOCK_VOLUME],
        }
    }
}

impl<V> VoxelBlock<V> {
    #[inline]
    pub fn linearize(local: IVec3) -> usize {
        debug_assert!(local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(BLOCK_EDGE)).all());
        BlockShape::linearize(local.to_array()) as usize
    }

    #[inline]
    pub fn delinearize(index: usize) -> IVec3 {
        IVec3::from(BlockShape::delinearize(index as i32))
    }

    /// All local coordinates, in linear order.
    pub fn local_coords() -> impl Iterator<Item = IVec3> {
        (0..BlockShape::SIZE).map(|i| IVec3::from(BlockShape::delinearize(i)))
    }
}

impl<V> Index<IVec3> for VoxelBlock<V> {
    type Output = V;

    #[inline]
    fn index(&self, local: IVec3) -> &Self::Output {
        &self.voxels[Self::linearize(local)]
    }
}

impl<V> IndexMut<IVec3> for VoxelBlock<V> {
    #[inline]
    fn index_mut(&mut self, local: IVec3) -> &mut Self::Output {
        &mut self.voxels[Self::linearize(local)]
    }
}

/// The global coordinates of the minimum voxel in the block at `block`.
#[inline]
pub fn block_min_voxel(block: BlockUnits<IVec3>) -> VoxelUnits<IVec3> {
    VoxelUnits(block.0 * BLOCK_EDGE)
}

/// Splits global voxel coordinates into `(block coordinates, local coordinates within the block)`.
#[inline]
pub fn split_voxel_coords(voxel: VoxelUnits<IVec3>) -> (BlockUnits<IVec3>, IVec3) {
    let v = voxel.0;
    let block = IVec3::new(
        v.x.div_euclid(BLOCK_EDGE),
        v.y.div_euclid(BLOCK_EDGE),
        v.z.div_euclid(BLOCK_EDGE),
    );
    let local = IVec3::new(
        v.x.rem_euclid(BLOCK_EDGE),
        v.y.rem_euclid(BLOCK_EDGE),
        v.z.rem_euclid(BLOCK_EDGE),
    );
    (BlockUnits(block), local)
}

/// Voxel centers lie on integer multiples of `voxel_size`, so this rounds to the nearest center.
#[inline]
pub fn voxel_nearest_point(p: WorldUnits<Vec3>, voxel_size: f32) -> VoxelUnits<IVec3> {
    VoxelUnits((p.0 / voxel_size).round().as_ivec3())
}

/// World position of the center of voxel `voxel`.
#[inline]
pub fn voxel_center(voxel: VoxelUnits<IVec3>, voxel_size: f32) -> WorldUnits<Vec3> {
    WorldUnits(voxel.0.as_vec3() * voxel_size)
}

/// Converts a world point into continuous block coordinates. The containing block is the floor of the result.
#[inline]
pub fn world_to_block_space(p: WorldUnits<Vec3>, voxel_size: f32) -> BlockUnits<Vec3> {
    BlockUnits(p.0 / (voxel_size * BLOCK_EDGE as f32))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
