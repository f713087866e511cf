//! Voxel backbone with point-image fusion.

use std::collections::BTreeMap;

use burn::prelude::*;

use crate::backbone::{
    assemble_output, channel_map, down, forward_blocks, input_tensor, subm, OUT_FEATURES,
};
use crate::batch::{BackboneOutput, VoxelBatch};
use crate::config::{BackboneConfig, CombineMethod, FusionConfig, FusionPoint};
use crate::error::Result;
use crate::fusion::{CrossAttention, ImageBackbone, PointFusion};
use crate::nn::PostActBlock;
use crate::sparse::{sparse_shape, ConvKind, SparseConvConfig};

/// Plain voxel backbone with image features fused in at a configurable
/// stage. The voxel stages match [`VoxelBackbone8x`](super::VoxelBackbone8x);
/// the fusion module runs either after the first stage (stride 1) or after
/// the fourth (stride 8).
///
/// This struct intentionally doesn't derive Module: the fusion module holds
/// trait-object collaborators (image backbone, cross-attention) whose
/// parameters are owned and trained by the caller's model.
pub struct VoxelFusionBackbone8x<B: Backend> {
    conv_input: PostActBlock<B>,
    conv1: Vec<PostActBlock<B>>,
    conv2: Vec<PostActBlock<B>>,
    conv3: Vec<PostActBlock<B>>,
    conv4: Vec<PostActBlock<B>>,
    conv_out: PostActBlock<B>,
    fusion: PointFusion<B>,
    sparse_shape: [usize; 3],
    stage1_channels: usize,
    stage4_channels: usize,
}

impl<B: Backend> VoxelFusionBackbone8x<B> {
    /// Create the backbone.
    ///
    /// With the concatenating combine method the stage directly after the
    /// injection point is widened by the image channel count.
    pub fn new(
        config: &BackboneConfig,
        fusion_config: FusionConfig,
        image_backbone: Box<dyn ImageBackbone<B>>,
        attention: Option<Box<dyn CrossAttention<B>>>,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;

        let extra = match fusion_config.combine {
            CombineMethod::Concat => fusion_config.image_channels,
            CombineMethod::Sum => 0,
        };
        let (conv2_in, conv_out_in) = match fusion_config.fusion_pos {
            FusionPoint::Stage1 => (16 + extra, 64),
            FusionPoint::Stage4 => (16, 64 + extra),
        };
        let (stage1_channels, stage4_channels) = (conv2_in, conv_out_in);

        let fusion = PointFusion::new(fusion_config, image_backbone, attention)?;

        Ok(Self {
            conv_input: PostActBlock::new(&subm(config.input_channels, 16), device),
            conv1: vec![PostActBlock::new(&subm(16, 16), device)],
            conv2: vec![
                PostActBlock::new(&down(conv2_in, 32, [1, 1, 1]), device),
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
                &SparseConvConfig::new(conv_out_in, OUT_FEATURES, [3, 1, 1])
                    .with_stride([2, 1, 1])
                    .with_padding([config.last_pad; 3])
                    .with_kind(ConvKind::Sparse),
                device,
            ),
            fusion,
            sparse_shape: sparse_shape(config.grid_size),
            stage1_channels,
            stage4_channels,
        })
    }

    /// Forward pass over one voxelized batch.
    ///
    /// The multi-scale stage outputs reflect the fusion: the stage at the
    /// injection point carries the fused features.
    pub fn forward(&self, batch: &VoxelBatch<B>) -> Result<BackboneOutput<B>> {
        let input = input_tensor(batch, self.sparse_shape)?;

        let x = self.conv_input.forward(&input);
        let mut x_conv1 = forward_blocks(&self.conv1, &x);
        if *self.fusion.injection_point() == FusionPoint::Stage1 {
            x_conv1 = self.fusion.forward(&x_conv1, batch, 1)?;
        }

        let x_conv2 = forward_blocks(&self.conv2, &x_conv1);
        let x_conv3 = forward_blocks(&self.conv3, &x_conv2);
        let mut x_conv4 = forward_blocks(&self.conv4, &x_conv3);
        if *self.fusion.injection_point() == FusionPoint::Stage4 {
            x_conv4 = self.fusion.forward(&x_conv4, batch, 8)?;
        }

        let out = self.conv_out.forward(&x_conv4);

        Ok(assemble_output(out, [x_conv1, x_conv2, x_conv3, x_conv4]))
    }

    /// Channel width per stage, for downstream consumers.
    pub fn backbone_channels(&self) -> BTreeMap<String, usize> {
        channel_map([self.stage1_channels, 32, 64, self.stage4_channels])
    }

    /// Channel width of the encoded output tensor.
    pub fn num_point_features(&self) -> usize {
        OUT_FEATURES
    }
}
