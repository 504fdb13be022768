//! Real-time fusion of calibrated depth and color frames into a sparse truncated signed distance field.
//!
//! The map lives in [`voxfuse_map`]; this crate adds configuration, error reporting, and the [`FusionEngine`] that runs the
//! per-frame passes in order.
//!
//! ```no_run
//! use voxfuse::{Config, FusionEngine};
//! use voxfuse::voxfuse_core::geometry::Intrinsics;
//! use voxfuse::voxfuse_map::{CameraPose, DepthImage, DepthVoxel, View};
//!
//! let config = Config::read_file("voxfuse.ron").unwrap();
//! let mut engine = FusionEngine::<DepthVoxel>::new(config).unwrap();
//! let view = View::depth_only(
//!     DepthImage::filled(640, 480, 1.5),
//!     Intrinsics::new(525.0, 525.0, 319.5, 239.5),
//! );
//! let report = engine.integrate_frame(&view, &CameraPose::IDENTITY).unwrap();
//! println!("allocated {} blocks", report.allocated.len());
//! ```

mod config;
mod engine;
mod error;

pub use config::Config;
pub use engine::{DefaultBackend, FrameReport, FrameTimings, FusionEngine};
pub use error::{ConfigError, FusionError, Result};

// Re-exports.
pub use voxfuse_core;
pub use voxfuse_map;
