use crate::glam::{Vec2, Vec3};

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub start: Vec3,
    velocity: Vec3,
}

impl Ray {
    pub fn new(start: Vec3, velocity: Vec3) -> Self {
        Self { start, velocity }
    }

    /// The ray that reaches `end` at `t = 1`.
    pub fn between(start: Vec3, end: Vec3) -> Self {
        Self::new(start, end - start)
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn position_at(&self, t: f32) -> Vec3 {
        self.start + t * self.velocity
    }

    /// `num_samples` evenly spaced points from `t = 0` to `t = 1`, both ends included. A single sample is just the start.
    pub fn sample_points(&self, num_samples: u32) -> impl Iterator<Item = Vec3> {
        let step = if num_samples > 1 {
            self.velocity / (num_samples - 1) as f32
        } else {
            Vec3::ZERO
        };
        let start = self.start;
        (0..num_samples).map(move |i| start + i as f32 * step)
    }
}

/// Pinhole camera intrinsics, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Projects a camera-space point onto the image plane. The caller must reject points with `z <= 0` first.
    #[inline]
    pub fn project(&self, p: Vec3) -> Vec2 {
        Vec2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// The camera-space point at `depth` along the ray through `pixel`.
    #[inline]
    pub fn unproject(&self, pixel: Vec2, depth: f32) -> Vec3 {
        Vec3::new(
            depth * (pixel.x - self.cx) / self.fx,
            depth * (pixel.y - self.cy) / self.fy,
            depth,
        )
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
