use crate::block::BLOCK_EDGE;
use crate::buffers::{ScratchBuffers, VisibilityType};
use crate::hash::HashTable;

use itertools::iproduct;
use voxfuse_core::geometry::Intrinsics;
use voxfuse_core::glam::{IVec3, Mat4, Vec3};
use voxfuse_core::Backend;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockVisibility {
    /// Some corner projects into the image.
    pub is_visible: bool,
    /// Some corner projects into the image enlarged by an eighth of its size on every side. Implied by `is_visible`.
    pub is_visible_enlarged: bool,
}

/// Tests the 8 corners of the block at `block` against the camera frustum.
///
/// The enlarged margin is only tested when `enlarged` is set; otherwise `is_visible_enlarged` just mirrors `is_visible`.
pub fn check_block_visibility(
    block: IVec3,
    world_to_camera: &Mat4,
    intrinsics: &Intrinsics,
    voxel_size: f32,
    image_size: [usize; 2],
    enlarged: bool,
) -> BlockVisibility {
    let block_size = voxel_size * BLOCK_EDGE as f32;
    let origin = block.as_vec3() * block_size;
    let [w, h] = [image_size[0] as i32, image_size[1] as i32];
    let (min_x, max_x) = ((-w / 8) as f32, (w + w / 8) as f32);
    let (min_y, max_y) = ((-h / 8) as f32, (h + h / 8) as f32);

    let mut result = BlockVisibility::default();
    for (z, y, x) in iproduct!(0..2, 0..2, 0..2) {
        let corner = Vec3::new(x as f32, y as f32, z as f32);
        let p = world_to_camera.transform_point3(origin + corner * block_size);
        if p.z < 1e-10 {
            continue;
        }
        let px = intrinsics.project(p);
        if px.x >= 0.0 && px.x < w as f32 && px.y >= 0.0 && px.y < h as f32 {
            return BlockVisibility {
                is_visible: true,
                is_visible_enlarged: true,
            };
        }
        if enlarged && px.x >= min_x && px.x < max_x && px.y >= min_y && px.y < max_y {
            result.is_visible_enlarged = true;
        }
    }

    result
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VisibleSet {
    /// Every slot with a non-invisible type, in slot order.
    pub visible: Vec<usize>,
    /// The subset of `visible` whose blocks are in external storage.
    pub swap_in: Vec<usize>,
}

/// Re-tests the entries that were visible last frame and were not observed this frame, then collects the visible set. Evicted
/// entries that remain visible become swap-in requests.
///
/// With `swapping`, an entry stays visible while it is inside the enlarged frustum, which keeps blocks resident a little longer
/// than they are strictly visible.
#[allow(clippy::too_many_arguments)]
pub fn refine_visibility<B: Backend>(
    backend: &B,
    table: &HashTable,
    buffers: &ScratchBuffers,
    previously_visible: &[usize],
    world_to_camera: &Mat4,
    intrinsics: &Intrinsics,
    voxel_size: f32,
    image_size: [usize; 2],
    swapping: bool,
) -> VisibleSet {
    backend.for_each_index(previously_visible.len(), |i| {
        let slot = previously_visible[i];
        if buffers.visibility(slot) != VisibilityType::PreviouslyVisible {
            return;
        }
        let entry = table.entry(slot);
        let still_visible = entry.handle.has_known_position() && {
            let v = check_block_visibility(
                entry.pos,
                world_to_camera,
                intrinsics,
                voxel_size,
                image_size,
                swapping,
            );
            if swapping {
                v.is_visible_enlarged
            } else {
                v.is_visible
            }
        };
        if !still_visible {
            buffers.set_visibility(slot, VisibilityType::Invisible);
        } else if entry.handle.is_evicted() {
            buffers.set_visibility(slot, VisibilityType::VisibleEvicted);
        }
    });

    let mut set = VisibleSet::default();
    for slot in 0..buffers.len() {
        let visibility = buffers.visibility(slot);
        if !visibility.is_visible() {
            continue;
        }
        if !table.entry(slot).handle.has_known_position() {
            buffers.set_visibility(slot, VisibilityType::Invisible);
            continue;
        }
        set.visible.push(slot);
        if visibility == VisibilityType::VisibleEvicted {
            set.swap_in.push(slot);
        }
    }

    set
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
