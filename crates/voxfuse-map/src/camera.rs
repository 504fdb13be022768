use ndshape::{RuntimeShape, Shape};
use std::fmt;
use voxfuse_core::geometry::Intrinsics;
use voxfuse_core::glam::{Mat4, Vec2, Vec3};

/// A 2D image, x-major.
#[derive(Clone)]
pub struct Image<T> {
    shape: RuntimeShape<usize, 2>,
    pixels: Vec<T>,
}

/// Depth in meters. Non-positive values mean "no measurement".
pub type DepthImage = Image<f32>;
/// RGBA, 8 bits per channel. Alpha is ignored.
pub type ColorImage = Image<[u8; 4]>;

impl<T: Copy> Image<T> {
    /// Returns `None` unless `pixels.len() == width * height`.
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Option<Self> {
        let shape = RuntimeShape::<usize, 2>::new([width, height]);
        (pixels.len() == shape.usize()).then(|| Self { shape, pixels })
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        let shape = RuntimeShape::<usize, 2>::new([width, height]);
        Self {
            pixels: vec![value; shape.usize()],
            shape,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.shape.as_array()[0]
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.shape.as_array()[1]
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.pixels[self.shape.linearize([x, y])]
    }

    /// The image coordinates of the pixel at linear index `i`.
    #[inline]
    pub fn coords_of(&self, i: usize) -> (usize, usize) {
        let [x, y] = self.shape.delinearize(i);
        (x, y)
    }

    /// `true` if `p` lies in `[1, width - 2] × [1, height - 2]`, where both nearest and bilinear sampling stay in bounds.
    #[inline]
    pub fn contains_inset(&self, p: Vec2) -> bool {
        p.x >= 1.0
            && p.x <= self.width() as f32 - 2.0
            && p.y >= 1.0
            && p.y <= self.height() as f32 - 2.0
    }

    /// The pixel nearest to `p`, which must satisfy [`Self::contains_inset`].
    #[inline]
    pub fn sample_nearest(&self, p: Vec2) -> T {
        self.get((p.x + 0.5) as usize, (p.y + 0.5) as usize)
    }
}

impl<T> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("shape", &self.shape.as_array())
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> PartialEq for Image<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape.as_array() == other.shape.as_array() && self.pixels == other.pixels
    }
}

impl ColorImage {
    /// Bilinearly interpolated RGB at `p`, in `[0, 255]`. `p` must satisfy [`Image::contains_inset`].
    pub fn sample_bilinear_rgb(&self, p: Vec2) -> Vec3 {
        let x = p.x.floor();
        let y = p.y.floor();
        let (cx, cy) = (p.x - x, p.y - y);
        let (x, y) = (x as usize, y as usize);

        let rgb = |c: [u8; 4]| Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32);
        let a = rgb(self.get(x, y));
        let b = rgb(self.get(x + 1, y));
        let c = rgb(self.get(x, y + 1));
        let d = rgb(self.get(x + 1, y + 1));

        a * (1.0 - cx) * (1.0 - cy) + b * cx * (1.0 - cy) + c * (1.0 - cx) * cy + d * cx * cy
    }
}

/// A rigid camera pose, kept together with its inverse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    camera_to_world: Mat4,
    world_to_camera: Mat4,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl CameraPose {
    pub const IDENTITY: Self = Self {
        camera_to_world: Mat4::IDENTITY,
        world_to_camera: Mat4::IDENTITY,
    };

    pub fn from_camera_to_world(camera_to_world: Mat4) -> Self {
        Self {
            camera_to_world,
            world_to_camera: camera_to_world.inverse(),
        }
    }

    pub fn from_world_to_camera(world_to_camera: Mat4) -> Self {
        Self {
            camera_to_world: world_to_camera.inverse(),
            world_to_camera,
        }
    }

    #[inline]
    pub fn camera_to_world(&self) -> &Mat4 {
        &self.camera_to_world
    }

    #[inline]
    pub fn world_to_camera(&self) -> &Mat4 {
        &self.world_to_camera
    }
}

/// One frame of sensor input.
#[derive(Clone, Debug)]
pub struct View {
    pub depth: DepthImage,
    pub color: Option<ColorImage>,
    pub depth_intrinsics: Intrinsics,
    pub color_intrinsics: Intrinsics,
    /// Maps depth-camera coordinates to color-camera coordinates.
    pub depth_to_color: Mat4,
}

impl View {
    /// A depth-only view.
    pub fn depth_only(depth: DepthImage, intrinsics: Intrinsics) -> Self {
        Self {
            depth,
            color: None,
            depth_intrinsics: intrinsics,
            color_intrinsics: intrinsics,
            depth_to_color: Mat4::IDENTITY,
        }
    }

    /// A registered RGB-D view: both images share the depth camera.
    pub fn registered(depth: DepthImage, color: ColorImage, intrinsics: Intrinsics) -> Self {
        Self {
            color: Some(color),
            ..Self::depth_only(depth, intrinsics)
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
