//! Error types for voxel_fusion.

use thiserror::Error;

/// Errors that can occur while assembling or running a backbone.
#[derive(Error, Debug)]
pub enum VoxelFusionError {
    /// Invalid configuration, detected at construction or first use.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Tensor shape mismatch.
    #[error("tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// A batch input required by the fusion module is absent.
    #[error("missing batch input `{field}`: required when image fusion is enabled")]
    MissingInput {
        /// Name of the missing field.
        field: String,
    },
}

/// Result type for voxel_fusion operations.
pub type Result<T> = std::result::Result<T, VoxelFusionError>;
