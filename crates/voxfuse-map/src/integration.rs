//! Fuses one frame of depth (and color) into the voxels of the visible blocks.
//!
//! Every voxel keeps a running weighted average of the truncated signed distances observed for it. The distance is measured
//! along the camera's optical axis, scaled by the truncation band `mu`, and clamped to `1.0` in front of the surface. Voxels
//! more than `mu` behind the surface are left alone, since they could be hidden by the observed surface.

use crate::block::{block_min_voxel, voxel_center, VoxelBlock};
use crate::camera::{CameraPose, ColorImage, DepthImage, View};
use crate::config::SceneParams;
use crate::sdf::Sd16;
use crate::units::{BlockUnits, VoxelUnits};
use crate::voxel::TsdfVoxel;

use voxfuse_core::geometry::Intrinsics;
use voxfuse_core::glam::{IVec3, Mat4, Vec3};
use voxfuse_core::Backend;

/// Distances with magnitude below this fraction of `mu` are close enough to the surface to carry reliable color.
const COLOR_BAND: f32 = 0.25;

/// Everything needed to project world points into the current frame's images.
#[derive(Clone, Copy)]
pub struct FrameProjection<'a> {
    pub depth: &'a DepthImage,
    pub color: Option<&'a ColorImage>,
    pub depth_intrinsics: &'a Intrinsics,
    pub color_intrinsics: &'a Intrinsics,
    pub world_to_depth: Mat4,
    pub world_to_color: Mat4,
}

impl<'a> FrameProjection<'a> {
    pub fn new(view: &'a View, pose: &CameraPose) -> Self {
        let world_to_depth = *pose.world_to_camera();
        Self {
            depth: &view.depth,
            color: view.color.as_ref(),
            depth_intrinsics: &view.depth_intrinsics,
            color_intrinsics: &view.color_intrinsics,
            world_to_depth,
            world_to_color: view.depth_to_color * world_to_depth,
        }
    }
}

/// Integrates the depth measurement for the voxel centered at world point `point`.
///
/// Returns the signed distance `eta` from the voxel to the measured surface along the optical axis, or `-1.0` if there is no
/// usable measurement. The voxel is only updated when `eta >= -mu`.
#[inline]
pub fn update_voxel_depth<V: TsdfVoxel>(
    voxel: &mut V,
    point: Vec3,
    world_to_depth: &Mat4,
    intrinsics: &Intrinsics,
    depth: &DepthImage,
    mu: f32,
    max_weight: u16,
) -> f32 {
    let p = world_to_depth.transform_point3(point);
    if p.z <= 0.0 {
        return -1.0;
    }
    let px = intrinsics.project(p);
    if !depth.contains_inset(px) {
        return -1.0;
    }

    let measured = depth.sample_nearest(px);
    if !(measured > 0.0) {
        return -1.0;
    }

    let eta = measured - p.z;
    if eta < -mu {
        return eta;
    }

    let old_sdf = f32::from(voxel.sdf());
    let old_weight = voxel.depth_weight();
    let new_sdf = (eta / mu).min(1.0);
    let w = old_weight as f32;
    let sdf = (w * old_sdf + new_sdf) / (w + 1.0);
    voxel.set_depth(Sd16::from(sdf), old_weight.saturating_add(1).min(max_weight));

    eta
}

/// Integrates the color measurement for the voxel centered at world point `point`.
#[inline]
pub fn update_voxel_color<V: TsdfVoxel>(
    voxel: &mut V,
    point: Vec3,
    world_to_color: &Mat4,
    intrinsics: &Intrinsics,
    color: &ColorImage,
    max_weight: u8,
) {
    let p = world_to_color.transform_point3(point);
    if p.z <= 0.0 {
        return;
    }
    let px = intrinsics.project(p);
    if !color.contains_inset(px) {
        return;
    }

    let measured = color.sample_bilinear_rgb(px) / 255.0;
    let [r, g, b] = voxel.color();
    let old = Vec3::new(r as f32, g as f32, b as f32) / 255.0;
    let old_weight = voxel.color_weight();
    let w = old_weight as f32;
    let new = (old * w + measured) / (w + 1.0);

    let to_byte = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    voxel.set_color(
        [to_byte(new.x), to_byte(new.y), to_byte(new.z)],
        old_weight.saturating_add(1).min(max_weight),
    );
}

/// Depth, then color if the voxel type carries it and the voxel is close enough to the surface.
#[inline]
pub fn integrate_voxel<V: TsdfVoxel>(
    voxel: &mut V,
    point: Vec3,
    frame: &FrameProjection,
    params: &SceneParams,
) {
    let mu = params.mu;
    let eta = update_voxel_depth(
        voxel,
        point,
        &frame.world_to_depth,
        frame.depth_intrinsics,
        frame.depth,
        mu,
        params.max_depth_weight,
    );

    if !V::HAS_COLOR {
        return;
    }
    if eta > mu || (eta / mu).abs() > COLOR_BAND {
        return;
    }
    if let Some(color) = frame.color {
        update_voxel_color(
            voxel,
            point,
            &frame.world_to_color,
            frame.color_intrinsics,
            color,
            params.max_color_weight,
        );
    }
}

/// Integrates every voxel of the block at block coordinates `pos`.
pub fn integrate_block<V: TsdfVoxel>(
    block: &mut VoxelBlock<V>,
    pos: IVec3,
    frame: &FrameProjection,
    params: &SceneParams,
) {
    let min = block_min_voxel(BlockUnits(pos)).into_inner();
    for (i, local) in VoxelBlock::<V>::local_coords().enumerate() {
        let voxel = &mut block.voxels[i];
        if params.stop_integrating_at_max_weight && voxel.depth_weight() == params.max_depth_weight {
            continue;
        }
        let point = voxel_center(VoxelUnits(min + local), params.voxel_size).into_inner();
        integrate_voxel(voxel, point, frame, params);
    }
}

/// Integrates `blocks[i]` at block coordinates `targets[i]` for every `i` with a target.
pub fn integrate_blocks<V: TsdfVoxel, B: Backend>(
    backend: &B,
    blocks: &mut [VoxelBlock<V>],
    targets: &[Option<IVec3>],
    frame: &FrameProjection,
    params: &SceneParams,
) {
    debug_assert_eq!(blocks.len(), targets.len());
    backend.for_each_mut(blocks, |i, block| {
        if let Some(pos) = targets[i] {
            integrate_block(block, pos, frame, params);
        }
    });
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

    use crate::voxel::{ColorVoxel, DepthVoxel, AMBIENT_SD16};
    use approx::assert_relative_eq;
    use voxfuse_core::Sequential;

    const INTRINSICS: Intrinsics = Intrinsics::new(50.0, 50.0, 32.0, 24.0);
    const MU: f32 = 0.02;

    fn plane(depth: f32) -> DepthImage {
        DepthImage::filled(64, 48, depth)
    }

    fn update_depth(voxel: &mut impl TsdfVoxel, z: f32, image: &DepthImage) -> f32 {
        update_voxel_depth(
            voxel,
            Vec3::new(0.0, 0.0, z),
            &Mat4::IDENTITY,
            &INTRINSICS,
            image,
            MU,
            100,
        )
    }

    #[test]
    fn first_observation_replaces_the_ambient_value() {
        let mut voxel = DepthVoxel::default();
        let eta = update_depth(&mut voxel, 1.99, &plane(2.0));
        assert_relative_eq!(eta, 0.01, epsilon = 1e-5);
        assert_relative_eq!(f32::from(voxel.sdf), 0.5, epsilon = 1e-3);
        assert_eq!(voxel.w_depth, 1);

        // Far in front of the surface, the distance is clamped.
        let mut voxel = DepthVoxel::default();
        update_depth(&mut voxel, 1.5, &plane(2.0));
        assert_eq!(voxel.sdf, Sd16::MAX);
        assert_eq!(voxel.w_depth, 1);
    }

    #[test]
    fn voxels_far_behind_the_surface_are_untouched() {
        let mut voxel = DepthVoxel::default();
        let eta = update_depth(&mut voxel, 2.05, &plane(2.0));
        assert_relative_eq!(eta, -0.05, epsilon = 1e-5);
        assert_eq!(voxel, DepthVoxel::default());
    }

    #[test]
    fn missing_measurements_are_rejected() {
        let mut voxel = DepthVoxel::default();
        assert_eq!(update_depth(&mut voxel, 1.99, &plane(0.0)), -1.0);
        assert_eq!(update_depth(&mut voxel, -1.0, &plane(2.0)), -1.0);
        assert_eq!(update_depth(&mut voxel, 0.0, &plane(2.0)), -1.0);

        // Projects outside of the inset image border.
        let eta = update_voxel_depth(
            &mut voxel,
            Vec3::new(5.0, 0.0, 1.99),
            &Mat4::IDENTITY,
            &INTRINSICS,
            &plane(2.0),
            MU,
            100,
        );
        assert_eq!(eta, -1.0);
        assert_eq!(voxel, DepthVoxel::default());
    }

    #[test]
    fn repeated_observations_converge_and_weight_saturates() {
        let mut voxel = DepthVoxel {
            sdf: Sd16::from(-1.0),
            w_depth: 5,
        };
        let image = plane(2.0);
        let mut last_error = 1.5;
        for _ in 0..500 {
            update_depth(&mut voxel, 1.99, &image);
            let error = (f32::from(voxel.sdf) - 0.5).abs();
            assert!(error <= last_error);
            last_error = error;
        }
        assert_eq!(voxel.w_depth, 100);
        assert!(last_error < 0.01);
    }

    fn color_frame<'a>(depth: &'a DepthImage, color: &'a ColorImage) -> FrameProjection<'a> {
        FrameProjection {
            depth,
            color: Some(color),
            depth_intrinsics: &INTRINSICS,
            color_intrinsics: &INTRINSICS,
            world_to_depth: Mat4::IDENTITY,
            world_to_color: Mat4::IDENTITY,
        }
    }

    #[test]
    fn color_is_only_fused_near_the_surface() {
        let depth = plane(2.0);
        let color = ColorImage::filled(64, 48, [255, 128, 0, 255]);
        let frame = color_frame(&depth, &color);
        let params = SceneParams {
            mu: MU,
            ..Default::default()
        };

        // |eta / mu| = 0.1
        let mut voxel = ColorVoxel::default();
        integrate_voxel(&mut voxel, Vec3::new(0.0, 0.0, 1.998), &frame, &params);
        assert_eq!(voxel.rgb, [255, 128, 0]);
        assert_eq!(voxel.w_color, 1);
        assert_eq!(voxel.w_depth, 1);

        // |eta / mu| = 0.5
        let mut voxel = ColorVoxel::default();
        integrate_voxel(&mut voxel, Vec3::new(0.0, 0.0, 1.99), &frame, &params);
        assert_eq!(voxel.w_depth, 1);
        assert_eq!(voxel.rgb, [0; 3]);
        assert_eq!(voxel.w_color, 0);

        // eta > mu
        let mut voxel = ColorVoxel::default();
        integrate_voxel(&mut voxel, Vec3::new(0.0, 0.0, 1.9), &frame, &params);
        assert_eq!(voxel.w_color, 0);

        // Depth-only voxels ignore the color image.
        let mut voxel = DepthVoxel::default();
        integrate_voxel(&mut voxel, Vec3::new(0.0, 0.0, 1.998), &frame, &params);
        assert_eq!(voxel.w_depth, 1);
    }

    #[test]
    fn color_is_averaged_and_weight_saturates() {
        let depth = plane(2.0);
        let red = ColorImage::filled(64, 48, [200, 0, 0, 255]);
        let blue = ColorImage::filled(64, 48, [0, 0, 100, 255]);
        let params = SceneParams {
            max_color_weight: 3,
            ..Default::default()
        };
        let point = Vec3::new(0.0, 0.0, 1.999);

        let mut voxel = ColorVoxel::default();
        integrate_voxel(&mut voxel, point, &color_frame(&depth, &red), &params);
        integrate_voxel(&mut voxel, point, &color_frame(&depth, &blue), &params);
        assert_eq!(voxel.rgb, [100, 0, 50]);
        assert_eq!(voxel.w_color, 2);

        for _ in 0..5 {
            integrate_voxel(&mut voxel, point, &color_frame(&depth, &blue), &params);
        }
        assert_eq!(voxel.w_color, 3);
    }

    #[test]
    fn color_camera_uses_its_own_pose() {
        let depth = plane(2.0);
        let mut color = ColorImage::filled(64, 48, [0, 0, 0, 255]);
        // The color camera is shifted 0.4 m to the right, so the depth camera's optical axis lands 10 pixels to the left.
        for y in 0..48 {
            color.pixels_mut()[21 + y * 64] = [0, 255, 0, 255];
            color.pixels_mut()[22 + y * 64] = [0, 255, 0, 255];
        }
        let view = View {
            depth: depth.clone(),
            color: Some(color),
            depth_intrinsics: INTRINSICS,
            color_intrinsics: INTRINSICS,
            depth_to_color: Mat4::from_translation(Vec3::new(-0.4, 0.0, 0.0)),
        };
        let frame = FrameProjection::new(&view, &CameraPose::IDENTITY);

        let mut voxel = ColorVoxel::default();
        integrate_voxel(&mut voxel, Vec3::new(0.0, 0.0, 1.999), &frame, &SceneParams::default());
        assert_eq!(voxel.rgb, [0, 255, 0]);
    }

    #[test]
    fn saturated_voxels_can_be_frozen() {
        let depth = plane(2.0);
        let frame = FrameProjection {
            depth: &depth,
            color: None,
            depth_intrinsics: &INTRINSICS,
            color_intrinsics: &INTRINSICS,
            world_to_depth: Mat4::IDENTITY,
            world_to_color: Mat4::IDENTITY,
        };
        let params = SceneParams {
            max_depth_weight: 2,
            stop_integrating_at_max_weight: true,
            ..Default::default()
        };

        // Block (0, 0, 49) covers z in [1.96, 2.0) with 5 mm voxels.
        let mut block = VoxelBlock::<DepthVoxel>::default();
        let pos = IVec3::new(0, 0, 49);
        integrate_block(&mut block, pos, &frame, &params);
        integrate_block(&mut block, pos, &frame, &params);
        let after_two = block;
        assert!(after_two.voxels.iter().any(|v| v.w_depth == 2));

        integrate_block(&mut block, pos, &frame, &params);
        assert_eq!(block, after_two);
    }

    #[test]
    fn parallel_integration_matches_sequential() {
        let depth = plane(2.0);
        let frame = FrameProjection {
            depth: &depth,
            color: None,
            depth_intrinsics: &INTRINSICS,
            color_intrinsics: &INTRINSICS,
            world_to_depth: Mat4::IDENTITY,
            world_to_color: Mat4::IDENTITY,
        };
        let params = SceneParams::default();
        let targets = vec![Some(IVec3::new(0, 0, 49)), None, Some(IVec3::new(1, -1, 50))];

        let mut sequential = vec![VoxelBlock::<DepthVoxel>::default(); 3];
        integrate_blocks(&Sequential, &mut sequential, &targets, &frame, &params);
        assert!(sequential[0].voxels.iter().any(|v| v.w_depth == 1));
        assert!(sequential[1].voxels.iter().all(|v| v.sdf == AMBIENT_SD16 && v.w_depth == 0));

        #[cfg(feature = "parallel")]
        {
            let mut parallel = vec![VoxelBlock::<DepthVoxel>::default(); 3];
            integrate_blocks(&voxfuse_core::Parallel, &mut parallel, &targets, &frame, &params);
            assert_eq!(parallel, sequential);
        }
    }
}
