//! Residual voxel backbone.

use std::collections::BTreeMap;

use burn::module::Module;
use burn::prelude::*;

use crate::backbone::{
    assemble_output, channel_map, forward_res_blocks, input_tensor, OUT_FEATURES,
};
use crate::batch::{BackboneOutput, VoxelBatch};
use crate::config::BackboneConfig;
use crate::error::Result;
use crate::nn::{PostActBlock, SparseBasicBlock};
use crate::sparse::{sparse_shape, ConvKind, SparseConvConfig, SparseNormConfig};

/// Sparse voxel backbone with 8x cumulative downsampling, built from
/// residual blocks. Compared to the plain variant, the fourth stage is twice
/// as wide.
#[derive(Module, Debug)]
pub struct VoxelResBackbone8x<B: Backend> {
    conv_input: PostActBlock<B>,
    conv1: Vec<SparseBasicBlock<B>>,
    down2: PostActBlock<B>,
    res2: Vec<SparseBasicBlock<B>>,
    down3: PostActBlock<B>,
    res3: Vec<SparseBasicBlock<B>>,
    down4: PostActBlock<B>,
    res4: Vec<SparseBasicBlock<B>>,
    conv_out: PostActBlock<B>,
    #[module(skip)]
    sparse_shape: [usize; 3],
}

impl<B: Backend> VoxelResBackbone8x<B> {
    /// Create the backbone.
    pub fn new(config: &BackboneConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let res_pair = |planes: usize, device: &B::Device| {
            let norm = SparseNormConfig::new(planes);
            vec![
                SparseBasicBlock::new(planes, &norm, device),
                SparseBasicBlock::new(planes, &norm, device),
            ]
        };
        let down = |in_c: usize, out_c: usize, padding: [usize; 3], device: &B::Device| {
            PostActBlock::new(
                &SparseConvConfig::new(in_c, out_c, [3, 3, 3])
                    .with_stride([2, 2, 2])
                    .with_padding(padding)
                    .with_kind(ConvKind::Sparse),
                device,
            )
        };

        Ok(Self {
            conv_input: PostActBlock::new(
                &SparseConvConfig::new(config.input_channels, 16, [3, 3, 3])
                    .with_padding([1, 1, 1]),
                device,
            ),
            conv1: res_pair(16, device),
            down2: down(16, 32, [1, 1, 1], device),
            res2: res_pair(32, device),
            down3: down(32, 64, [1, 1, 1], device),
            res3: res_pair(64, device),
            down4: down(64, 128, [0, 1, 1], device),
            res4: res_pair(128, device),
            conv_out: PostActBlock::new(
                &SparseConvConfig::new(128, OUT_FEATURES, [3, 1, 1])
                    .with_stride([2, 1, 1])
                    .with_padding([config.last_pad; 3])
                    .with_kind(ConvKind::Sparse),
                device,
            ),
            sparse_shape: sparse_shape(config.grid_size),
        })
    }

    /// Forward pass over one voxelized batch.
    pub fn forward(&self, batch: &VoxelBatch<B>) -> Result<BackboneOutput<B>> {
        let input = input_tensor(batch, self.sparse_shape)?;

        let x = self.conv_input.forward(&input);
        let x_conv1 = forward_res_blocks(&self.conv1, &x);
        let x_conv2 = forward_res_blocks(&self.res2, &self.down2.forward(&x_conv1));
        let x_conv3 = forward_res_blocks(&self.res3, &self.down3.forward(&x_conv2));
        let x_conv4 = forward_res_blocks(&self.res4, &self.down4.forward(&x_conv3));

        let out = self.conv_out.forward(&x_conv4);

        Ok(assemble_output(out, [x_conv1, x_conv2, x_conv3, x_conv4]))
    }

    /// Channel width per stage, for downstream consumers.
    pub fn backbone_channels(&self) -> BTreeMap<String, usize> {
        channel_map([16, 32, 64, 128])
    }

    /// Channel width of the encoded output tensor.
    pub fn num_point_features(&self) -> usize {
        OUT_FEATURES
    }
}
