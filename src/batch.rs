//! Batch input and output records for the backbones.

use std::collections::BTreeMap;
use std::sync::Arc;

use burn::prelude::*;

use crate::fusion::Calibration;
use crate::sparse::SparseTensor;

/// Per-sample data augmentation record, used to invert voxel coordinates
/// back to the original frame before camera projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentationState {
    /// Global scale factor applied by augmentation.
    pub scale: Option<f32>,
    /// Rotation angle about the vertical axis, in radians.
    pub rotation: Option<f32>,
    /// Whether the point cloud was mirrored along the first horizontal axis.
    pub flip_x: bool,
    /// Whether the point cloud was mirrored along the second horizontal axis.
    pub flip_y: bool,
}

/// One batch of voxelized point cloud data, plus the optional camera inputs
/// consumed by the fusion backbone.
pub struct VoxelBatch<B: Backend> {
    /// Voxel feature vectors: `[N, C]`.
    pub voxel_features: Tensor<B, 2>,
    /// Voxel coordinates: one `(batch_idx, z, y, x)` entry per feature row.
    pub voxel_coords: Vec<[i32; 4]>,
    /// Number of batch elements.
    pub batch_size: usize,

    /// Camera images: `[batch, channels, height, width]`.
    pub images: Option<Tensor<B, 4>>,
    /// Per-element camera calibration, one entry per batch element.
    pub calibrations: Vec<Arc<dyn Calibration>>,
    /// Per-element augmentation scale factors.
    pub noise_scale: Option<Vec<f32>>,
    /// Per-element augmentation rotation angles (radians).
    pub noise_rot: Option<Vec<f32>>,
    /// Per-element horizontal flip flags.
    pub flip_x: Option<Vec<bool>>,
    /// Per-element lateral flip flags.
    pub flip_y: Option<Vec<bool>>,
}

impl<B: Backend> VoxelBatch<B> {
    /// Create a batch from voxel features and coordinates.
    pub fn new(
        voxel_features: Tensor<B, 2>,
        voxel_coords: Vec<[i32; 4]>,
        batch_size: usize,
    ) -> Self {
        Self {
            voxel_features,
            voxel_coords,
            batch_size,
            images: None,
            calibrations: Vec::new(),
            noise_scale: None,
            noise_rot: None,
            flip_x: None,
            flip_y: None,
        }
    }

    /// Attach camera images.
    pub fn with_images(mut self, images: Tensor<B, 4>) -> Self {
        self.images = Some(images);
        self
    }

    /// Attach per-element camera calibrations.
    pub fn with_calibrations(mut self, calibrations: Vec<Arc<dyn Calibration>>) -> Self {
        self.calibrations = calibrations;
        self
    }

    /// Attach per-element augmentation scale factors.
    pub fn with_noise_scale(mut self, scale: Vec<f32>) -> Self {
        self.noise_scale = Some(scale);
        self
    }

    /// Attach per-element augmentation rotation angles.
    pub fn with_noise_rot(mut self, rot: Vec<f32>) -> Self {
        self.noise_rot = Some(rot);
        self
    }

    /// Attach per-element flip flags for the first horizontal axis.
    pub fn with_flip_x(mut self, flip: Vec<bool>) -> Self {
        self.flip_x = Some(flip);
        self
    }

    /// Attach per-element flip flags for the second horizontal axis.
    pub fn with_flip_y(mut self, flip: Vec<bool>) -> Self {
        self.flip_y = Some(flip);
        self
    }

    /// Number of active voxels across the whole batch.
    pub fn num_voxels(&self) -> usize {
        self.voxel_coords.len()
    }

    /// Collect the augmentation record for one batch element.
    pub fn augmentation(&self, b: usize) -> AugmentationState {
        AugmentationState {
            scale: self.noise_scale.as_ref().map(|v| v[b]),
            rotation: self.noise_rot.as_ref().map(|v| v[b]),
            flip_x: self.flip_x.as_ref().map(|v| v[b]).unwrap_or(false),
            flip_y: self.flip_y.as_ref().map(|v| v[b]).unwrap_or(false),
        }
    }
}

/// Multi-scale output of a backbone forward pass.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    /// Deepest sparse feature map, handed to the detection head.
    pub encoded_spconv_tensor: SparseTensor<B>,
    /// Cumulative downsampling stride of the encoded tensor.
    pub encoded_spconv_tensor_stride: usize,
    /// Intermediate feature maps by stage name (`x_conv1`..`x_conv4`).
    pub multi_scale_3d_features: BTreeMap<String, SparseTensor<B>>,
    /// Cumulative downsampling stride per stage name.
    pub multi_scale_3d_strides: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_augmentation_record_defaults() {
        let device = Default::default();
        let batch = VoxelBatch::<TestBackend>::new(
            Tensor::zeros([2, 4], &device),
            vec![[0, 0, 0, 0], [0, 1, 1, 1]],
            1,
        );

        let aug = batch.augmentation(0);
        assert!(aug.scale.is_none());
        assert!(aug.rotation.is_none());
        assert!(!aug.flip_x);
        assert!(!aug.flip_y);
    }

    #[test]
    fn test_augmentation_record_per_element() {
        let device = Default::default();
        let batch = VoxelBatch::<TestBackend>::new(
            Tensor::zeros([2, 4], &device),
            vec![[0, 0, 0, 0], [1, 1, 1, 1]],
            2,
        )
        .with_noise_scale(vec![1.0, 1.1])
        .with_flip_x(vec![false, true]);

        let aug = batch.augmentation(1);
        assert_eq!(aug.scale, Some(1.1));
        assert!(aug.flip_x);
        assert!(!aug.flip_y);
    }
}
