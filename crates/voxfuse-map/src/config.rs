use serde::{Deserialize, Serialize};

/// Per-frame fusion parameters. Distances are in meters.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SceneParams {
    /// Edge length of a single voxel.
    pub voxel_size: f32,
    /// Half-width of the truncation band around the observed surface.
    pub mu: f32,
    pub max_depth_weight: u16,
    pub max_color_weight: u8,
    /// Depth measurements whose truncation band starts closer than this are ignored.
    pub view_frustum_min: f32,
    /// Depth measurements whose truncation band ends farther than this are ignored.
    pub view_frustum_max: f32,
    /// Skip voxels whose depth weight has already saturated.
    pub stop_integrating_at_max_weight: bool,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            voxel_size: 0.005,
            mu: 0.02,
            max_depth_weight: 100,
            max_color_weight: 100,
            view_frustum_min: 0.2,
            view_frustum_max: 3.0,
            stop_integrating_at_max_weight: false,
        }
    }
}

impl SceneParams {
    /// World-space edge length of a voxel block.
    #[inline]
    pub fn block_size(&self) -> f32 {
        self.voxel_size * crate::block::BLOCK_EDGE as f32
    }
}

/// Fixed capacities of the hash table and the block pool. These cannot change after a scene is created.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TableConfig {
    /// Number of slots in the ordered region of the hash table.
    pub bucket_count: usize,
    /// Number of slots in the excess region of the hash table.
    pub excess_capacity: usize,
    /// Number of voxel blocks that can be resident at once.
    pub block_capacity: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            bucket_count: 1 << 20,
            excess_capacity: 1 << 17,
            block_capacity: 1 << 16,
        }
    }
}
