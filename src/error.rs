use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// Errors from handing a malformed frame to the [`FusionEngine`](crate::FusionEngine).
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("image size mismatch: expected {expected:?}, got {actual:?}")]
    ImageSize {
        expected: [usize; 2],
        actual: [usize; 2],
    },

    #[error("empty depth image")]
    EmptyDepth,

    #[error("invalid camera: {0}")]
    InvalidCamera(String),
}

impl FusionError {
    #[must_use]
    pub const fn image_size(expected: [usize; 2], actual: [usize; 2]) -> Self {
        Self::ImageSize { expected, actual }
    }

    #[must_use]
    pub fn invalid_camera(reason: impl Into<String>) -> Self {
        Self::InvalidCamera(reason.into())
    }
}

pub type Result<T, E = FusionError> = std::result::Result<T, E>;
