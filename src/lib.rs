//! # voxel_fusion
//!
//! Sparse 3D convolutional backbones for voxelized point clouds, with
//! optional LiDAR-camera feature fusion, built on Burn.
//!
//! ## Features
//!
//! - **Sparse conv primitives**: submanifold, strided, and inverse sparse
//!   convolutions over coordinate-list voxel tensors
//! - **Backbones**: `VoxelBackbone8x` (plain blocks), `VoxelResBackbone8x`
//!   (residual blocks), `VoxelFusionBackbone8x` (plain blocks + image fusion)
//! - **Multi-scale output**: stage features at cumulative strides 1/2/4/8
//!   plus a depth-compressed encoded tensor at stride 8
//! - **Point-image fusion**: voxel centers projected into camera frames,
//!   fused by direct pixel sampling or an external cross-attention network
//!
//! ## Quick Start
//!
//! ```ignore
//! use voxel_fusion::{BackboneConfig, VoxelBackbone8x, VoxelBatch};
//! use burn::backend::NdArray;
//!
//! type B = NdArray;
//!
//! let device = Default::default();
//! let config = BackboneConfig::new(4, [1408, 1600, 40]);
//! let backbone = VoxelBackbone8x::<B>::new(&config, &device)?;
//!
//! let batch = VoxelBatch::new(voxel_features, voxel_coords, batch_size);
//! let output = backbone.forward(&batch)?;
//! assert_eq!(output.encoded_spconv_tensor_stride, 8);
//! ```
//!
//! ## Coordinate conventions
//!
//! Voxel coordinates are `(batch, z, y, x)` over a grid of shape
//! `(depth + 1, height, width)` derived from the `(x, y, z)` grid size; see
//! [`sparse::sparse_shape`]. Fusion configs carry voxel size and range
//! origin in the same `(z, y, x)` axis order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backbone;
pub mod batch;
pub mod config;
pub mod error;
pub mod fusion;
pub mod nn;
pub mod sparse;

// Re-export key types for convenience
pub use backbone::{VoxelBackbone8x, VoxelFusionBackbone8x, VoxelResBackbone8x};
pub use batch::{BackboneOutput, VoxelBatch};
pub use config::{BackboneConfig, FusionConfig};
pub use error::{Result, VoxelFusionError};
pub use sparse::SparseTensor;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backbone::{
        VoxelBackbone8x, VoxelFusionBackbone8x, VoxelResBackbone8x, STAGE_NAMES, STAGE_STRIDES,
    };
    pub use crate::batch::{AugmentationState, BackboneOutput, VoxelBatch};
    pub use crate::config::{
        BackboneConfig, CombineMethod, FusionConfig, FusionMethod, FusionPoint,
    };
    pub use crate::error::{Result, VoxelFusionError};
    pub use crate::fusion::{
        align_voxels_to_image, Calibration, CrossAttention, ImageBackbone, ImagePyramid,
        PointFusion,
    };
    pub use crate::nn::{PostActBlock, SparseBasicBlock};
    pub use crate::sparse::{
        sparse_shape, ConvKind, SparseConv, SparseConvConfig, SparseNorm, SparseNormConfig,
        SparseTensor,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_public_api() {
        let _backbone = BackboneConfig::new(4, [16, 16, 40]);
        let _fusion = FusionConfig::new(16);
    }

    #[test]
    fn test_backbone_creation() {
        let device = Default::default();
        let config = BackboneConfig::new(4, [16, 16, 40]);
        let backbone = VoxelBackbone8x::<TestBackend>::new(&config, &device).unwrap();

        assert_eq!(backbone.num_point_features(), 128);
        assert_eq!(backbone.backbone_channels()["x_conv4"], 64);
    }

    #[test]
    fn test_res_backbone_creation() {
        let device = Default::default();
        let config = BackboneConfig::new(4, [16, 16, 40]);
        let backbone = VoxelResBackbone8x::<TestBackend>::new(&config, &device).unwrap();

        assert_eq!(backbone.num_point_features(), 128);
        assert_eq!(backbone.backbone_channels()["x_conv4"], 128);
    }
}
