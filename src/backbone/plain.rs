//! Plain (post-activation block) voxel backbone.

use std::collections::BTreeMap;

use burn::module::Module;
use burn::prelude::*;

use crate::backbone::{
    assemble_output, channel_map, down, forward_blocks, input_tensor, subm, OUT_FEATURES,
};
use crate::batch::{BackboneOutput, VoxelBatch};
use crate::config::BackboneConfig;
use crate::error::Result;
use crate::nn::PostActBlock;
use crate::sparse::{sparse_shape, ConvKind, SparseConvConfig};

/// Sparse voxel backbone with 8x cumulative downsampling, built from plain
/// post-activation blocks.
#[derive(Module, Debug)]
pub struct VoxelBackbone8x<B: Backend> {
    conv_input: PostActBlock<B>,
    conv1: Vec<PostActBlock<B>>,
    conv2: Vec<PostActBlock<B>>,
    conv3: Vec<PostActBlock<B>>,
    conv4: Vec<PostActBlock<B>>,
    conv_out: PostActBlock<B>,
    #[module(skip)]
    sparse_shape: [usize; 3],
}

impl<B: Backend> VoxelBackbone8x<B> {
    /// Create the backbone.
    pub fn new(config: &BackboneConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            conv_input: PostActBlock::new(&subm(config.input_channels, 16), device),
            conv1: vec![PostActBlock::new(&subm(16, 16), device)],
            conv2: vec![
                PostActBlock::new(&down(16, 32, [1, 1, 1]), device),
                PostActBlock::new(&subm(32, 32), device),
                PostActBlock::new(&subm(32, 32), device),
            ],
            conv3: vec![
                PostActBlock::new(&down(32, 64, [1, 1, 1]), device),
                PostActBlock::new(&subm(64, 64), device),
                PostActBlock::new(&subm(64, 64), device),
            ],
            conv4: vec![
                PostActBlock::new(&down(64, 64, [0, 1, 1]), device),
                PostActBlock::new(&subm(64, 64), device),
                PostActBlock::new(&subm(64, 64), device),
            ],
            conv_out: PostActBlock::new(
                &SparseConvConfig::new(64, OUT_FEATURES, [3, 1, 1])
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
        let x_conv1 = forward_blocks(&self.conv1, &x);
        let x_conv2 = forward_blocks(&self.conv2, &x_conv1);
        let x_conv3 = forward_blocks(&self.conv3, &x_conv2);
        let x_conv4 = forward_blocks(&self.conv4, &x_conv3);

        let out = self.conv_out.forward(&x_conv4);

        Ok(assemble_output(out, [x_conv1, x_conv2, x_conv3, x_conv4]))
    }

    /// Channel width per stage, for downstream consumers.
    pub fn backbone_channels(&self) -> BTreeMap<String, usize> {
        channel_map([16, 32, 64, 64])
    }

    /// Channel width of the encoded output tensor.
    pub fn num_point_features(&self) -> usize {
        OUT_FEATURES
    }
}
