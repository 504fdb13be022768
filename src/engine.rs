use crate::{Config, ConfigError, FusionError, Result};

use std::time::Duration;
use voxfuse_core::glam::IVec3;
use voxfuse_core::{Backend, Sequential, WorkTimer};
use voxfuse_map::{CameraPose, Scene, TsdfVoxel, View};

#[cfg(feature = "parallel")]
pub type DefaultBackend = voxfuse_core::Parallel;
#[cfg(not(feature = "parallel"))]
pub type DefaultBackend = Sequential;

/// Wall time spent in each pass of a frame.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameTimings {
    pub allocation: Duration,
    pub visibility: Duration,
    pub integration: Duration,
}

impl FrameTimings {
    pub fn total(&self) -> Duration {
        self.allocation + self.visibility + self.integration
    }
}

/// What happened to the scene during one call to [`FusionEngine::integrate_frame`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    /// Zero-based index of the frame.
    pub frame: u64,
    /// Block coordinates of the blocks allocated this frame.
    pub allocated: Vec<IVec3>,
    /// Ray-march steps skipped on bucket lock contention. Their blocks are usually found again next frame. Always zero for the
    /// sequential backend.
    pub deferred_steps: u64,
    /// Ray-march steps whose block lost its slot to another block's request. These blocks are still allocated this frame.
    pub queued_steps: u64,
    /// Allocations dropped because the block pool or the excess region was full.
    pub failed_allocations: u32,
    pub visible_blocks: usize,
    pub integrated_blocks: usize,
    /// Hash slots of visible blocks that are evicted and should be restored.
    pub swap_in: Vec<usize>,
    pub timings: FrameTimings,
}

/// Fuses a stream of depth (and color) frames into a [`Scene`].
pub struct FusionEngine<V, B = DefaultBackend> {
    scene: Scene<V>,
    backend: B,
    swapping: bool,
    frames_integrated: u64,
    frame_timer: WorkTimer,
    image_sizes: Option<ImageSizes>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ImageSizes {
    depth: [usize; 2],
    color: Option<[usize; 2]>,
}

impl<V: TsdfVoxel> FusionEngine<V, DefaultBackend> {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_backend(config, DefaultBackend::default())
    }
}

impl<V: TsdfVoxel> FusionEngine<V, Sequential> {
    pub fn sequential(config: Config) -> Result<Self, ConfigError> {
        Self::with_backend(config, Sequential)
    }
}

impl<V: TsdfVoxel, B: Backend> FusionEngine<V, B> {
    pub fn with_backend(config: Config, backend: B) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!(
            "Creating scene with {} buckets, {} excess slots, {} blocks",
            config.table.bucket_count,
            config.table.excess_capacity,
            config.table.block_capacity
        );

        Ok(Self {
            scene: Scene::new(config.scene, config.table),
            backend,
            swapping: config.swapping,
            frames_integrated: 0,
            frame_timer: WorkTimer::start(),
            image_sizes: None,
        })
    }

    #[inline]
    pub fn scene(&self) -> &Scene<V> {
        &self.scene
    }

    /// Direct access for eviction and restoration between frames.
    #[inline]
    pub fn scene_mut(&mut self) -> &mut Scene<V> {
        &mut self.scene
    }

    #[inline]
    pub fn frames_integrated(&self) -> u64 {
        self.frames_integrated
    }

    /// Mean wall time of [`Self::integrate_frame`] over every frame since creation or the last reset.
    pub fn average_frame_time_us(&self) -> u32 {
        self.frame_timer.average_time_us()
    }

    /// Forgets every block. The next frame may use different image sizes.
    pub fn reset(&mut self) {
        self.scene.reset();
        self.image_sizes = None;
        self.frames_integrated = 0;
        self.frame_timer = WorkTimer::start();
    }

    /// Runs the allocation, visibility, and integration passes for one frame taken from `pose` (depth camera to world).
    ///
    /// A frame without any valid depth leaves the scene untouched apart from re-testing the visibility of last frame's blocks.
    pub fn integrate_frame(&mut self, view: &View, pose: &CameraPose) -> Result<FrameReport> {
        self.validate_frame(view, pose)?;

        let mut timer = WorkTimer::start();
        self.scene.begin_frame();
        let march = self.scene.request_allocations(&self.backend, view, pose);
        let allocation = self.scene.commit_allocations();
        let allocation_time = timer.lap();

        let visible = self.scene.refine_visibility(&self.backend, view, pose, self.swapping);
        let visible_blocks = visible.visible.len();
        let swap_in = visible.swap_in.clone();
        let visibility_time = timer.lap();

        let integrated_blocks = self.scene.integrate(&self.backend, view, pose);
        let integration_time = timer.lap();

        let report = FrameReport {
            frame: self.frames_integrated,
            allocated: allocation.allocated,
            deferred_steps: march.deferred,
            queued_steps: march.queued,
            failed_allocations: allocation.failed,
            visible_blocks,
            integrated_blocks,
            swap_in,
            timings: FrameTimings {
                allocation: allocation_time,
                visibility: visibility_time,
                integration: integration_time,
            },
        };
        self.frames_integrated += 1;
        self.frame_timer.complete_item(report.timings.total());

        log::debug!(
            "Frame {}: allocated {} blocks ({} queued steps, {} deferred steps, {} failed), {} visible, {} integrated, {} swap-in \
             requests",
            report.frame,
            report.allocated.len(),
            report.queued_steps,
            report.deferred_steps,
            report.failed_allocations,
            report.visible_blocks,
            report.integrated_blocks,
            report.swap_in.len(),
        );
        log::debug!(
            "Frame {} timings: allocation {} us, visibility {} us, integration {} us (average frame {} us)",
            report.frame,
            allocation_time.as_micros(),
            visibility_time.as_micros(),
            integration_time.as_micros(),
            self.frame_timer.average_time_us(),
        );

        Ok(report)
    }

    fn validate_frame(&mut self, view: &View, pose: &CameraPose) -> Result<()> {
        let depth = [view.depth.width(), view.depth.height()];
        if depth[0] == 0 || depth[1] == 0 {
            return Err(FusionError::EmptyDepth);
        }

        for (name, k) in [
            ("depth", &view.depth_intrinsics),
            ("color", &view.color_intrinsics),
        ] {
            let finite = [k.fx, k.fy, k.cx, k.cy].iter().all(|x| x.is_finite());
            if !finite || k.fx == 0.0 || k.fy == 0.0 {
                return Err(FusionError::invalid_camera(format!(
                    "{} intrinsics {:?} are degenerate",
                    name, k
                )));
            }
        }
        if !pose.camera_to_world().is_finite() || !view.depth_to_color.is_finite() {
            return Err(FusionError::invalid_camera("pose is not finite"));
        }

        let sizes = ImageSizes {
            depth,
            color: view.color.as_ref().map(|c| [c.width(), c.height()]),
        };
        match self.image_sizes {
            None => self.image_sizes = Some(sizes),
            Some(expected) => {
                if expected.depth != sizes.depth {
                    log::warn!("Rejecting frame with depth image size {:?}", sizes.depth);
                    return Err(FusionError::image_size(expected.depth, sizes.depth));
                }
                if let (Some(expected), Some(actual)) = (expected.color, sizes.color) {
                    if expected != actual {
                        log::warn!("Rejecting frame with color image size {:?}", actual);
                        return Err(FusionError::image_size(expected, actual));
                    }
                }
                if expected.color.is_none() {
                    self.image_sizes = Some(ImageSizes {
                        color: sizes.color,
                        ..expected
                    });
                }
            }
        }

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
