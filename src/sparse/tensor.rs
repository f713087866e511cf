//! Sparse voxel feature tensor.

use std::fmt;

use burn::prelude::*;

use crate::error::{Result, VoxelFusionError};

/// A sparse 3D feature map over a voxel grid.
///
/// Features are stored as a dense `[N, C]` matrix aligned 1:1 with the voxel
/// index list. Indices are kept on the CPU because all site lookups and
/// projection bookkeeping in this crate are CPU-side index arithmetic; only
/// the feature matrix lives on the compute device.
pub struct SparseTensor<B: Backend> {
    /// Voxel feature vectors: `[N, C]`.
    pub features: Tensor<B, 2>,
    /// Voxel indices: one `(batch_idx, z, y, x)` entry per feature row.
    pub indices: Vec<[i32; 4]>,
    /// Spatial extent of the grid as `(D, H, W)`.
    pub spatial_shape: [usize; 3],
    /// Number of batch elements.
    pub batch_size: usize,
}

impl<B: Backend> SparseTensor<B> {
    /// Create a new sparse tensor.
    ///
    /// Fails with `ShapeMismatch` if the number of feature rows does not
    /// match the number of index entries.
    pub fn new(
        features: Tensor<B, 2>,
        indices: Vec<[i32; 4]>,
        spatial_shape: [usize; 3],
        batch_size: usize,
    ) -> Result<Self> {
        let rows = features.dims()[0];
        if rows != indices.len() {
            return Err(VoxelFusionError::ShapeMismatch {
                expected: vec![indices.len()],
                got: vec![rows],
            });
        }
        Ok(Self {
            features,
            indices,
            spatial_shape,
            batch_size,
        })
    }

    /// Number of active voxels.
    pub fn num_voxels(&self) -> usize {
        self.indices.len()
    }

    /// Number of feature channels.
    pub fn num_channels(&self) -> usize {
        self.features.dims()[1]
    }

    /// Build a new sparse tensor with the same indices but different features.
    ///
    /// The replacement must keep one feature row per voxel; the channel count
    /// is free to change.
    pub fn replace_features(&self, features: Tensor<B, 2>) -> Self {
        debug_assert_eq!(features.dims()[0], self.indices.len());
        Self {
            features,
            indices: self.indices.clone(),
            spatial_shape: self.spatial_shape,
            batch_size: self.batch_size,
        }
    }

    /// Device holding the feature matrix.
    pub fn device(&self) -> B::Device {
        self.features.device()
    }
}

impl<B: Backend> Clone for SparseTensor<B> {
    fn clone(&self) -> Self {
        Self {
            features: self.features.clone(),
            indices: self.indices.clone(),
            spatial_shape: self.spatial_shape,
            batch_size: self.batch_size,
        }
    }
}

impl<B: Backend> fmt::Debug for SparseTensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseTensor")
            .field("features", &self.features.dims())
            .field("num_voxels", &self.indices.len())
            .field("spatial_shape", &self.spatial_shape)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Compute the spatial shape handed to the sparse tensor from a voxel grid
/// size given as `(x, y, z)` counts.
///
/// The grid size is reversed to the `(z, y, x)` axis order the 3D convolution
/// stages use, and one padding voxel is appended on the depth axis.
pub fn sparse_shape(grid_size: [usize; 3]) -> [usize; 3] {
    [grid_size[2] + 1, grid_size[1], grid_size[0]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_creation_and_accessors() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let indices = vec![[0, 0, 0, 0], [0, 1, 1, 1], [0, 2, 2, 2]];

        let x = SparseTensor::new(features, indices, [8, 8, 8], 1).unwrap();
        assert_eq!(x.num_voxels(), 3);
        assert_eq!(x.num_channels(), 4);
        assert_eq!(x.spatial_shape, [8, 8, 8]);
    }

    #[test]
    fn test_row_count_mismatch() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let indices = vec![[0, 0, 0, 0], [0, 1, 1, 1], [0, 2, 2, 2]];

        let result = SparseTensor::new(features, indices, [8, 8, 8], 1);
        assert!(matches!(
            result,
            Err(VoxelFusionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_replace_features_keeps_indices() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let indices = vec![[0, 0, 0, 0], [0, 1, 1, 1]];
        let x = SparseTensor::new(features, indices.clone(), [8, 8, 8], 1).unwrap();

        let wider = Tensor::<TestBackend, 2>::zeros([2, 16], &device);
        let y = x.replace_features(wider);
        assert_eq!(y.indices, indices);
        assert_eq!(y.num_channels(), 16);
    }

    #[test]
    fn test_sparse_shape_reverses_and_pads_depth() {
        assert_eq!(sparse_shape([1600, 1408, 40]), [41, 1408, 1600]);
        assert_eq!(sparse_shape([16, 16, 40]), [41, 16, 16]);
    }
}
