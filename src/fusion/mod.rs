//! Multi-modal point-image fusion.
//!
//! This module bridges the irregular sparse voxel representation and dense
//! 2D image features. Camera projection, the 2D semantic backbone, and the
//! learned cross-attention network are external collaborators, injected as
//! trait objects with documented tensor shapes.

mod alignment;
mod strategy;

pub use alignment::{
    align_voxels_to_image, compute_frustum_mask, invert_augmentation, rotate_points_along_z,
    AlignedVoxels,
};
pub use strategy::{pad_ragged, PaddedBatch, PointFusion};

use burn::prelude::*;

use crate::error::Result;

/// Ordered image feature pyramid: layer name and dense `[B, C, H, W]` map
/// per requested extraction layer.
pub type ImagePyramid<B> = Vec<(String, Tensor<B, 4>)>;

/// Camera calibration for one batch element.
pub trait Calibration {
    /// Project points in the sensor frame, `(x, y, z)` order, to pixel
    /// coordinates `(u, v)`.
    fn lidar_to_img(&self, points: &[[f32; 3]]) -> Vec<[f32; 2]>;
}

/// The external 2D image backbone / semantic feature extractor.
pub trait ImageBackbone<B: Backend> {
    /// Run the image backbone over a dense `[B, C, H, W]` image batch and
    /// return one feature map per extraction layer.
    fn forward(&self, images: Tensor<B, 4>) -> Result<ImagePyramid<B>>;
}

/// The external learned cross-attention fusion network.
pub trait CrossAttention<B: Backend> {
    /// Enhance padded per-voxel features with image context.
    ///
    /// Inputs:
    /// - `voxel_features`: `[B, n, C]` padded voxel features
    /// - `pixel_coords`: `[B, n, 2]` normalized projected pixel coordinates
    /// - `image_pyramid`: image feature maps from the image backbone
    /// - `point_coords`: `[B, n, 3]` original-frame point coordinates, `(x, y, z)`
    ///
    /// Output: `[B, n, C]` enhanced features in the same padded layout.
    fn forward(
        &self,
        voxel_features: Tensor<B, 3>,
        pixel_coords: Tensor<B, 3>,
        image_pyramid: &ImagePyramid<B>,
        point_coords: Tensor<B, 3>,
    ) -> Tensor<B, 3>;
}
