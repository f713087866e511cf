//! Shared stubs for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use burn::backend::NdArray;
use burn::prelude::*;

use voxel_fusion::fusion::{Calibration, CrossAttention, ImageBackbone, ImagePyramid};
use voxel_fusion::{Result, VoxelBatch};

pub type TestBackend = NdArray;
pub type TestDevice = <TestBackend as Backend>::Device;

/// Calibration that returns a fixed pixel answer per point, regardless of
/// the point coordinates.
pub struct FixedCalib {
    pub pixels: Vec<[f32; 2]>,
}

impl Calibration for FixedCalib {
    fn lidar_to_img(&self, points: &[[f32; 3]]) -> Vec<[f32; 2]> {
        assert_eq!(points.len(), self.pixels.len());
        self.pixels.clone()
    }
}

/// Calibration that projects by dropping depth: (x, y, z) -> (x, y).
pub struct DropDepthCalib;

impl Calibration for DropDepthCalib {
    fn lidar_to_img(&self, points: &[[f32; 3]]) -> Vec<[f32; 2]> {
        points.iter().map(|p| [p[0], p[1]]).collect()
    }
}

/// Image backbone that returns the input image as a single-level pyramid.
pub struct PassthroughImageBackbone;

impl ImageBackbone<TestBackend> for PassthroughImageBackbone {
    fn forward(&self, images: Tensor<TestBackend, 4>) -> Result<ImagePyramid<TestBackend>> {
        Ok(vec![("layer1".to_string(), images)])
    }
}

/// Cross-attention stub that returns the voxel features unchanged.
pub struct IdentityAttention;

impl CrossAttention<TestBackend> for IdentityAttention {
    fn forward(
        &self,
        voxel_features: Tensor<TestBackend, 3>,
        _pixel_coords: Tensor<TestBackend, 3>,
        _image_pyramid: &ImagePyramid<TestBackend>,
        _point_coords: Tensor<TestBackend, 3>,
    ) -> Tensor<TestBackend, 3> {
        voxel_features
    }
}

/// Wrap a single calibration for a batch of one.
pub fn one_calib(calib: impl Calibration + 'static) -> Vec<Arc<dyn Calibration>> {
    vec![Arc::new(calib) as Arc<dyn Calibration>]
}

/// Build a single-element batch from voxel coordinates, with unit features.
pub fn unit_batch(
    coords: Vec<[i32; 4]>,
    channels: usize,
    device: &TestDevice,
) -> VoxelBatch<TestBackend> {
    let features = Tensor::ones([coords.len(), channels], device);
    VoxelBatch::new(features, coords, 1)
}
