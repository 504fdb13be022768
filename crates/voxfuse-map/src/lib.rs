//! The voxfuse map data model and the passes that fuse depth frames into it.
//!
//! # Voxels
//!
//! Space is described by a truncated signed distance field (TSDF). Each voxel stores the distance to the nearest observed
//! surface as a fraction of the truncation band `mu`, so values lie in `[-1, 1]` with 16-bit precision ([`Sd16`]). Positive
//! values are in front of the surface. Voxels also count how many observations they have averaged, and may carry a color with
//! its own weight (see [`TsdfVoxel`]).
//!
//! # Blocks
//!
//! Voxels are allocated `8 × 8 × 8` at a time as [`VoxelBlock`]s, and only near observed surfaces. A [`HashTable`] maps block
//! coordinates to slots in a fixed pool of blocks. Colliding coordinates are chained into an excess region of the table.
//!
//! # Frames
//!
//! Each frame of depth runs through the passes of [`Scene`]:
//!
//! - the allocation pass ([`allocation`]) finds the blocks near each depth measurement and creates the missing ones
//! - the visibility pass ([`visibility`]) decides which blocks are inside the camera frustum
//! - integration ([`integration`]) updates the voxels of every visible block

pub mod allocation;
pub mod block;
pub mod buffers;
pub mod camera;
pub mod config;
pub mod hash;
pub mod integration;
pub mod scene;
pub mod sdf;
pub mod units;
pub mod visibility;
pub mod voxel;

pub use allocation::{AllocationSummary, MarchStats, StepOutcome};
pub use block::*;
pub use buffers::{AllocationType, VisibilityType};
pub use camera::*;
pub use config::*;
pub use hash::{hash_index, BlockHandle, HashEntry, HashTable, InvariantViolation, Placement};
pub use scene::Scene;
pub use sdf::*;
pub use units::*;
pub use visibility::{check_block_visibility, BlockVisibility, VisibleSet};
pub use voxel::*;

// Re-exports.
pub use voxfuse_core;
