//! Multi-scale sparse voxel backbones.
//!
//! All variants share the same stage skeleton: an input stem, four stages at
//! cumulative strides 1/2/4/8, and a final output stage that downsamples the
//! depth axis only. They differ in block type (plain post-activation vs
//! residual) and in the presence of the image fusion module.

mod fusion;
mod plain;
mod residual;

pub use fusion::VoxelFusionBackbone8x;
pub use plain::VoxelBackbone8x;
pub use residual::VoxelResBackbone8x;

use std::collections::BTreeMap;

use burn::prelude::*;

use crate::batch::{BackboneOutput, VoxelBatch};
use crate::error::Result;
use crate::nn::{PostActBlock, SparseBasicBlock};
use crate::sparse::{ConvKind, SparseConvConfig, SparseTensor};

/// Stage names used in the multi-scale output maps.
pub const STAGE_NAMES: [&str; 4] = ["x_conv1", "x_conv2", "x_conv3", "x_conv4"];

/// Cumulative downsampling stride per stage.
pub const STAGE_STRIDES: [usize; 4] = [1, 2, 4, 8];

/// Channel width of the encoded output tensor.
pub const OUT_FEATURES: usize = 128;

/// Submanifold 3x3x3 block config with unit padding.
pub(crate) fn subm(in_channels: usize, out_channels: usize) -> SparseConvConfig {
    SparseConvConfig::new(in_channels, out_channels, [3, 3, 3]).with_padding([1, 1, 1])
}

/// Strided 3x3x3 downsampling block config.
pub(crate) fn down(
    in_channels: usize,
    out_channels: usize,
    padding: [usize; 3],
) -> SparseConvConfig {
    SparseConvConfig::new(in_channels, out_channels, [3, 3, 3])
        .with_stride([2, 2, 2])
        .with_padding(padding)
        .with_kind(ConvKind::Sparse)
}

/// Build the input sparse tensor from the raw batch record.
pub(crate) fn input_tensor<B: Backend>(
    batch: &VoxelBatch<B>,
    sparse_shape: [usize; 3],
) -> Result<SparseTensor<B>> {
    SparseTensor::new(
        batch.voxel_features.clone(),
        batch.voxel_coords.clone(),
        sparse_shape,
        batch.batch_size,
    )
}

/// Apply a sequence of post-activation blocks.
pub(crate) fn forward_blocks<B: Backend>(
    blocks: &[PostActBlock<B>],
    x: &SparseTensor<B>,
) -> SparseTensor<B> {
    let mut out = x.clone();
    for block in blocks {
        out = block.forward(&out);
    }
    out
}

/// Apply a sequence of residual blocks.
pub(crate) fn forward_res_blocks<B: Backend>(
    blocks: &[SparseBasicBlock<B>],
    x: &SparseTensor<B>,
) -> SparseTensor<B> {
    let mut out = x.clone();
    for block in blocks {
        out = block.forward(&out);
    }
    out
}

/// Assemble the output record from the encoded tensor and the four
/// intermediate stage outputs.
pub(crate) fn assemble_output<B: Backend>(
    encoded: SparseTensor<B>,
    stages: [SparseTensor<B>; 4],
) -> BackboneOutput<B> {
    let mut features = BTreeMap::new();
    let mut strides = BTreeMap::new();
    for ((name, stride), stage) in STAGE_NAMES.iter().zip(STAGE_STRIDES).zip(stages) {
        features.insert((*name).to_string(), stage);
        strides.insert((*name).to_string(), stride);
    }

    BackboneOutput {
        encoded_spconv_tensor: encoded,
        encoded_spconv_tensor_stride: 8,
        multi_scale_3d_features: features,
        multi_scale_3d_strides: strides,
    }
}

/// Build the per-stage channel map reported to downstream consumers.
pub(crate) fn channel_map(widths: [usize; 4]) -> BTreeMap<String, usize> {
    STAGE_NAMES
        .iter()
        .zip(widths)
        .map(|(name, c)| ((*name).to_string(), c))
        .collect()
}
