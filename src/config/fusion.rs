//! Image fusion configuration.

use burn::config::Config;

// The crate `Result` alias stays out of scope here: the Config derive
// expands serde impls that need the two-parameter `std::result::Result`.
use crate::error::VoxelFusionError;

/// Backbone depth at which image features are injected.
#[derive(Config, Debug, PartialEq)]
pub enum FusionPoint {
    /// After the first stage, at voxel stride 1.
    Stage1,
    /// After the fourth stage, at voxel stride 8.
    Stage4,
}

/// Fusion backend.
#[derive(Config, Debug, PartialEq)]
pub enum FusionMethod {
    /// Gather image features at projected pixel locations.
    DirectSample,
    /// Enhance voxel features through an external cross-attention network.
    Attention,
}

/// How image-derived features are merged with voxel features.
#[derive(Config, Debug, PartialEq)]
pub enum CombineMethod {
    /// Element-wise sum; channel counts must match.
    Sum,
    /// Channel concatenation, image features first.
    Concat,
}

/// Configuration for the point-image fusion module.
#[derive(Config, Debug)]
pub struct FusionConfig {
    /// Channel count of the image feature maps consumed by fusion.
    pub image_channels: usize,

    /// Injection point within the backbone.
    #[config(default = "FusionPoint::Stage1")]
    pub fusion_pos: FusionPoint,

    /// Fusion backend.
    #[config(default = "FusionMethod::DirectSample")]
    pub method: FusionMethod,

    /// Combination of image and voxel features.
    #[config(default = "CombineMethod::Sum")]
    pub combine: CombineMethod,

    /// Maximum voxel count per sample for attention padding. Samples with
    /// more active voxels are truncated (with a warning).
    #[config(default = 26000)]
    pub max_num_voxels: usize,

    /// Voxel edge length per axis, `(z, y, x)` order, in world units.
    #[config(default = "[0.1, 0.05, 0.05]")]
    pub voxel_size: [f32; 3],

    /// Lower corner of the point cloud range, `(z, y, x)` order.
    #[config(default = "[-3.0, -40.0, 0.0]")]
    pub range_origin: [f32; 3],

    /// Pretrained weights path handed to the image backbone collaborator.
    #[config(default = "String::new()")]
    pub image_pretrained: String,
}

impl FusionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.image_channels == 0 {
            return Err(VoxelFusionError::InvalidConfig {
                message: "image_channels must be positive".to_string(),
            });
        }
        if self.max_num_voxels == 0 {
            return Err(VoxelFusionError::InvalidConfig {
                message: "max_num_voxels must be positive".to_string(),
            });
        }
        if self.voxel_size.iter().any(|&v| v <= 0.0) {
            return Err(VoxelFusionError::InvalidConfig {
                message: format!("voxel_size must be positive on every axis, got {:?}", self.voxel_size),
            });
        }
        Ok(())
    }
}
