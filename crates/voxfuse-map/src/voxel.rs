use crate::sdf::Sd16;

use bytemuck::{Pod, Zeroable};
use std::mem;
use voxfuse_core::static_assertions::const_assert_eq;

/// "As far *outside* of the observed surface as possible." The value of every voxel that has never been observed.
pub const AMBIENT_SD16: Sd16 = Sd16::MAX;

/// A voxel that stores a truncated signed distance with an observation weight, and optionally a color.
///
/// Whether the color channel exists is known at compile time through [`TsdfVoxel::HAS_COLOR`], so integration code can branch
/// on it without any per-voxel cost. The color accessors of a voxel without color are no-ops.
pub trait TsdfVoxel: Copy + Default + Pod + Send + Sync {
    const HAS_COLOR: bool;

    fn sdf(&self) -> Sd16;
    fn depth_weight(&self) -> u16;
    fn set_depth(&mut self, sdf: Sd16, weight: u16);

    #[inline]
    fn color(&self) -> [u8; 3] {
        [0; 3]
    }

    #[inline]
    fn color_weight(&self) -> u8 {
        0
    }

    #[inline]
    fn set_color(&mut self, _color: [u8; 3], _weight: u8) {}
}

/// Signed distance and depth weight only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct DepthVoxel {
    pub sdf: Sd16,
    pub w_depth: u16,
}

const_assert_eq!(mem::size_of::<DepthVoxel>(), 4);

unsafe impl Zeroable for DepthVoxel {}
unsafe impl Pod for DepthVoxel {}

impl Default for DepthVoxel {
    fn default() -> Self {
        Self {
            sdf: AMBIENT_SD16,
            w_depth: 0,
        }
    }
}

impl TsdfVoxel for DepthVoxel {
    const HAS_COLOR: bool = false;

    #[inline]
    fn sdf(&self) -> Sd16 {
        self.sdf
    }

    #[inline]
    fn depth_weight(&self) -> u16 {
        self.w_depth
    }

    #[inline]
    fn set_depth(&mut self, sdf: Sd16, weight: u16) {
        self.sdf = sdf;
        self.w_depth = weight;
    }
}

/// Signed distance, depth weight, and an RGB color with its own weight.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct ColorVoxel {
    pub sdf: Sd16,
    pub w_depth: u16,
    pub rgb: [u8; 3],
    pub w_color: u8,
}

const_assert_eq!(mem::size_of::<ColorVoxel>(), 8);

unsafe impl Zeroable for ColorVoxel {}
unsafe impl Pod for ColorVoxel {}

impl Default for ColorVoxel {
    fn default() -> Self {
        Self {
            sdf: AMBIENT_SD16,
            w_depth: 0,
            rgb: [0; 3],
            w_color: 0,
        }
    }
}

impl TsdfVoxel for ColorVoxel {
    const HAS_COLOR: bool = true;

    #[inline]
    fn sdf(&self) -> Sd16 {
        self.sdf
    }

    #[inline]
    fn depth_weight(&self) -> u16 {
        self.w_depth
    }

    #[inline]
    fn set_depth(&mut self, sdf: Sd16, weight: u16) {
        self.sdf = sdf;
        self.w_depth = weight;
    }

    #[inline]
    fn color(&self) -> [u8; 3] {
        self.rgb
    }

    #[inline]
    fn color_weight(&self) -> u8 {
        self.w_color
    }

    #[inline]
    fn set_color(&mut self, color: [u8; 3], weight: u8) {
        self.rgb = color;
        self.w_color = weight;
    }
}
