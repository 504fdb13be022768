use crate::ConfigError;

use serde::{Deserialize, Serialize};
use std::path::Path;
use voxfuse_map::{SceneParams, TableConfig};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub scene: SceneParams,
    pub table: TableConfig,
    /// Keep blocks in the enlarged frustum visible, so an external streamer can page them in and out.
    pub swapping: bool,
}

impl Config {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = ron::de::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scene;
        if !(s.voxel_size > 0.0) {
            return Err(ConfigError::invalid(format!(
                "voxel_size must be positive, got {}",
                s.voxel_size
            )));
        }
        if !(s.mu > 0.0) {
            return Err(ConfigError::invalid(format!("mu must be positive, got {}", s.mu)));
        }
        if !(s.view_frustum_min >= 0.0 && s.view_frustum_min < s.view_frustum_max) {
            return Err(ConfigError::invalid(format!(
                "view frustum [{}, {}] is empty",
                s.view_frustum_min, s.view_frustum_max
            )));
        }
        if s.max_depth_weight == 0 || s.max_color_weight == 0 {
            return Err(ConfigError::invalid("maximum weights must be nonzero"));
        }

        let t = &self.table;
        if t.bucket_count == 0 || t.excess_capacity == 0 || t.block_capacity == 0 {
            return Err(ConfigError::invalid("table capacities must be nonzero"));
        }
        if t.excess_capacity >= i32::MAX as usize || t.block_capacity >= i32::MAX as u32 {
            return Err(ConfigError::invalid("capacities must fit in a block handle"));
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
